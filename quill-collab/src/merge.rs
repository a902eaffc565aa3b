//! Structural diff and three-way merge over line-oriented content.
//!
//! ```text
//!            base (fork point)
//!           ╱                ╲
//!       ours (target)    theirs (source)
//!           ╲                ╱
//!        merge_three_way(base, ours, theirs)
//!              │
//!              ├── Merged(lines)        disjoint / identical changes
//!              └── Conflicts(regions)   same region changed differently
//! ```
//!
//! The diff trims common prefix/suffix and runs an LCS alignment on the
//! middle, producing maximal replacement runs anchored to base line
//! ranges. The merge scans both edit lists by base position: edits
//! touching disjoint ranges combine, identical edits collapse, and
//! overlapping edits whose replacements differ become conflict regions.
//! Nothing here is heuristic — fixed inputs always produce the same
//! result, so a merge can be safely retried.

use serde::{Deserialize, Serialize};

/// Classification of a diff region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionKind {
    /// Lines present in `other` but not in `base`
    Added,
    /// Lines present in `base` but not in `other`
    Removed,
    /// A run of base lines replaced with different content
    Changed,
}

/// One region of a structural delta between two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub kind: RegionKind,
    /// First affected base line
    pub base_start: usize,
    /// Number of base lines covered (0 for pure additions)
    pub base_len: usize,
    /// Replacement lines (empty for pure removals)
    pub lines: Vec<String>,
}

/// A region both sides changed, incompatibly, relative to the base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRegion {
    pub base_start: usize,
    pub base_len: usize,
    pub base: Vec<String>,
    pub ours: Vec<String>,
    pub theirs: Vec<String>,
}

/// Result of a three-way merge.
///
/// `Conflicts` is not a failure: it is a structured report the caller
/// resolves manually and resubmits as an ordinary commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MergeOutcome {
    Merged(Vec<String>),
    Conflicts(Vec<ConflictRegion>),
}

/// A contiguous replacement of base lines, half-open on `[start, end)`.
/// `base_start == base_end` is a pure insertion at that point.
#[derive(Debug, Clone, PartialEq)]
struct Edit {
    base_start: usize,
    base_end: usize,
    lines: Vec<String>,
}

/// Structural delta between `base` and `other`.
pub fn diff(base: &[String], other: &[String]) -> Vec<Region> {
    edits(base, other)
        .into_iter()
        .map(|e| {
            let base_len = e.base_end - e.base_start;
            let kind = if base_len == 0 {
                RegionKind::Added
            } else if e.lines.is_empty() {
                RegionKind::Removed
            } else {
                RegionKind::Changed
            };
            Region {
                kind,
                base_start: e.base_start,
                base_len,
                lines: e.lines,
            }
        })
        .collect()
}

/// Edit script from `base` to `other`: prefix/suffix trim + LCS alignment.
fn edits(base: &[String], other: &[String]) -> Vec<Edit> {
    // Common prefix.
    let mut prefix = 0;
    while prefix < base.len() && prefix < other.len() && base[prefix] == other[prefix] {
        prefix += 1;
    }
    // Common suffix, not overlapping the prefix.
    let mut suffix = 0;
    while suffix < base.len() - prefix
        && suffix < other.len() - prefix
        && base[base.len() - 1 - suffix] == other[other.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let mb = &base[prefix..base.len() - suffix];
    let mo = &other[prefix..other.len() - suffix];
    let (m, n) = (mb.len(), mo.len());
    if m == 0 && n == 0 {
        return Vec::new();
    }

    // LCS length table, row-major (m+1) × (n+1), filled back to front.
    let width = n + 1;
    let mut table = vec![0u32; (m + 1) * width];
    for i in (0..m).rev() {
        for j in (0..n).rev() {
            table[i * width + j] = if mb[i] == mo[j] {
                table[(i + 1) * width + j + 1] + 1
            } else {
                table[(i + 1) * width + j].max(table[i * width + j + 1])
            };
        }
    }

    // Walk the alignment, emitting maximal non-matching runs.
    let mut out = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    let (mut run_i, mut run_j) = (0usize, 0usize);
    let mut in_run = false;
    while i < m && j < n {
        if mb[i] == mo[j] {
            if in_run {
                out.push(Edit {
                    base_start: prefix + run_i,
                    base_end: prefix + i,
                    lines: mo[run_j..j].to_vec(),
                });
                in_run = false;
            }
            i += 1;
            j += 1;
        } else {
            if !in_run {
                run_i = i;
                run_j = j;
                in_run = true;
            }
            if table[(i + 1) * width + j] >= table[i * width + j + 1] {
                i += 1;
            } else {
                j += 1;
            }
        }
    }
    if in_run || i < m || j < n {
        let (bs, os) = if in_run { (run_i, run_j) } else { (i, j) };
        out.push(Edit {
            base_start: prefix + bs,
            base_end: prefix + m,
            lines: mo[os..n].to_vec(),
        });
    }
    out
}

/// Whether an edit belongs to the group spanning `[gs, ge)`.
///
/// Edits starting inside the span overlap. An insertion exactly at the
/// group's point joins a pure-insertion group, so two sides inserting at
/// the same spot are compared instead of applied in arbitrary order.
fn absorbs(gs: usize, ge: usize, e: &Edit) -> bool {
    if e.base_start < ge {
        return true;
    }
    e.base_start == ge && ge == gs && e.base_start == e.base_end
}

/// Render one side's view of `base[gs..ge]` with its group edits applied.
fn render(base: &[String], gs: usize, ge: usize, group: &[&Edit]) -> Vec<String> {
    let mut out = Vec::new();
    let mut pos = gs;
    for e in group {
        out.extend_from_slice(&base[pos..e.base_start]);
        out.extend(e.lines.iter().cloned());
        pos = e.base_end;
    }
    out.extend_from_slice(&base[pos..ge]);
    out
}

/// Three-way merge of `ours` and `theirs` against their common `base`.
pub fn merge_three_way(base: &[String], ours: &[String], theirs: &[String]) -> MergeOutcome {
    let ours_edits = edits(base, ours);
    let theirs_edits = edits(base, theirs);

    let mut merged: Vec<String> = Vec::new();
    let mut conflicts: Vec<ConflictRegion> = Vec::new();
    let mut cursor = 0usize;
    let (mut oi, mut ti) = (0usize, 0usize);

    while oi < ours_edits.len() || ti < theirs_edits.len() {
        // Seed the group with the earliest-starting remaining edit.
        let o_start = ours_edits.get(oi).map(|e| e.base_start);
        let t_start = theirs_edits.get(ti).map(|e| e.base_start);
        let seed_ours = match (o_start, t_start) {
            (Some(a), Some(b)) => a <= b,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => unreachable!("loop condition"),
        };

        let mut o_group: Vec<&Edit> = Vec::new();
        let mut t_group: Vec<&Edit> = Vec::new();
        let gs;
        let mut ge;
        if seed_ours {
            let e = &ours_edits[oi];
            oi += 1;
            gs = e.base_start;
            ge = e.base_end;
            o_group.push(e);
        } else {
            let e = &theirs_edits[ti];
            ti += 1;
            gs = e.base_start;
            ge = e.base_end;
            t_group.push(e);
        }

        // Fixpoint: absorb every edit from either side overlapping the span.
        loop {
            let mut grew = false;
            if let Some(e) = ours_edits.get(oi) {
                if absorbs(gs, ge, e) {
                    ge = ge.max(e.base_end);
                    o_group.push(e);
                    oi += 1;
                    grew = true;
                }
            }
            if let Some(e) = theirs_edits.get(ti) {
                if absorbs(gs, ge, e) {
                    ge = ge.max(e.base_end);
                    t_group.push(e);
                    ti += 1;
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }

        // Copy the untouched span before the group.
        merged.extend_from_slice(&base[cursor..gs]);
        cursor = ge;

        match (o_group.is_empty(), t_group.is_empty()) {
            (false, true) => merged.extend(render(base, gs, ge, &o_group)),
            (true, false) => merged.extend(render(base, gs, ge, &t_group)),
            (false, false) => {
                let our_view = render(base, gs, ge, &o_group);
                let their_view = render(base, gs, ge, &t_group);
                if our_view == their_view {
                    // Both sides made the identical change.
                    merged.extend(our_view);
                } else {
                    conflicts.push(ConflictRegion {
                        base_start: gs,
                        base_len: ge - gs,
                        base: base[gs..ge].to_vec(),
                        ours: our_view,
                        theirs: their_view,
                    });
                    // Keep the base text in the (discarded) merged output.
                    merged.extend_from_slice(&base[gs..ge]);
                }
            }
            (true, true) => unreachable!("group always has a seed"),
        }
    }
    merged.extend_from_slice(&base[cursor..]);

    if conflicts.is_empty() {
        MergeOutcome::Merged(merged)
    } else {
        MergeOutcome::Conflicts(conflicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    // ── diff ─────────────────────────────────────────────────────

    #[test]
    fn test_diff_identical() {
        let a = lines(&["one", "two"]);
        assert!(diff(&a, &a).is_empty());
    }

    #[test]
    fn test_diff_both_empty() {
        assert!(diff(&[], &[]).is_empty());
    }

    #[test]
    fn test_diff_pure_addition() {
        let base = lines(&["one", "three"]);
        let other = lines(&["one", "two", "three"]);
        let regions = diff(&base, &other);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].kind, RegionKind::Added);
        assert_eq!(regions[0].base_start, 1);
        assert_eq!(regions[0].base_len, 0);
        assert_eq!(regions[0].lines, lines(&["two"]));
    }

    #[test]
    fn test_diff_pure_removal() {
        let base = lines(&["one", "two", "three"]);
        let other = lines(&["one", "three"]);
        let regions = diff(&base, &other);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].kind, RegionKind::Removed);
        assert_eq!(regions[0].base_start, 1);
        assert_eq!(regions[0].base_len, 1);
        assert!(regions[0].lines.is_empty());
    }

    #[test]
    fn test_diff_changed_region() {
        let base = lines(&["a", "b", "c"]);
        let other = lines(&["a", "B!", "c"]);
        let regions = diff(&base, &other);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].kind, RegionKind::Changed);
        assert_eq!(regions[0].base_start, 1);
        assert_eq!(regions[0].base_len, 1);
        assert_eq!(regions[0].lines, lines(&["B!"]));
    }

    #[test]
    fn test_diff_from_empty_base() {
        let regions = diff(&[], &lines(&["new", "text"]));
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].kind, RegionKind::Added);
        assert_eq!(regions[0].base_start, 0);
    }

    #[test]
    fn test_diff_multiple_regions() {
        let base = lines(&["a", "b", "c", "d", "e"]);
        let other = lines(&["A", "b", "c", "d", "E"]);
        let regions = diff(&base, &other);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].base_start, 0);
        assert_eq!(regions[1].base_start, 4);
    }

    // ── merge ────────────────────────────────────────────────────

    #[test]
    fn test_merge_disjoint_edits_combine() {
        let base = lines(&["one", "two", "three", "four"]);
        let ours = lines(&["ONE", "two", "three", "four"]);
        let theirs = lines(&["one", "two", "three", "FOUR"]);

        match merge_three_way(&base, &ours, &theirs) {
            MergeOutcome::Merged(result) => {
                assert_eq!(result, lines(&["ONE", "two", "three", "FOUR"]));
            }
            other => panic!("expected merge, got {other:?}"),
        }
    }

    #[test]
    fn test_merge_same_region_conflicts() {
        let base = lines(&["one", "two", "three"]);
        let ours = lines(&["one", "ours", "three"]);
        let theirs = lines(&["one", "theirs", "three"]);

        match merge_three_way(&base, &ours, &theirs) {
            MergeOutcome::Conflicts(regions) => {
                assert_eq!(regions.len(), 1);
                assert_eq!(regions[0].base_start, 1);
                assert_eq!(regions[0].base, lines(&["two"]));
                assert_eq!(regions[0].ours, lines(&["ours"]));
                assert_eq!(regions[0].theirs, lines(&["theirs"]));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_merge_identical_changes_collapse() {
        let base = lines(&["one", "two", "three"]);
        let both = lines(&["one", "rewritten", "three"]);

        match merge_three_way(&base, &both, &both) {
            MergeOutcome::Merged(result) => assert_eq!(result, both),
            other => panic!("expected merge, got {other:?}"),
        }
    }

    #[test]
    fn test_merge_one_side_unchanged() {
        let base = lines(&["one", "two"]);
        let ours = lines(&["one", "two"]);
        let theirs = lines(&["one", "two", "three"]);

        match merge_three_way(&base, &ours, &theirs) {
            MergeOutcome::Merged(result) => assert_eq!(result, theirs),
            other => panic!("expected merge, got {other:?}"),
        }
    }

    #[test]
    fn test_merge_insertions_at_same_point_conflict() {
        let base = lines(&["one", "two"]);
        let ours = lines(&["one", "from ours", "two"]);
        let theirs = lines(&["one", "from theirs", "two"]);

        match merge_three_way(&base, &ours, &theirs) {
            MergeOutcome::Conflicts(regions) => {
                assert_eq!(regions.len(), 1);
                assert_eq!(regions[0].base_len, 0);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_merge_adjacent_changes_do_not_conflict() {
        let base = lines(&["a", "b", "c", "d"]);
        let ours = lines(&["A", "b", "c", "d"]);
        let theirs = lines(&["a", "B", "c", "d"]);

        match merge_three_way(&base, &ours, &theirs) {
            MergeOutcome::Merged(result) => {
                assert_eq!(result, lines(&["A", "B", "c", "d"]));
            }
            other => panic!("expected merge, got {other:?}"),
        }
    }

    #[test]
    fn test_merge_removal_vs_change_conflicts() {
        let base = lines(&["keep", "contested", "keep2"]);
        let ours = lines(&["keep", "keep2"]);
        let theirs = lines(&["keep", "contested, edited", "keep2"]);

        match merge_three_way(&base, &ours, &theirs) {
            MergeOutcome::Conflicts(regions) => {
                assert_eq!(regions.len(), 1);
                assert!(regions[0].ours.is_empty());
                assert_eq!(regions[0].theirs, lines(&["contested, edited"]));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_merge_deterministic() {
        let base = lines(&["a", "b", "c", "d", "e"]);
        let ours = lines(&["a", "X", "c", "d", "e", "tail"]);
        let theirs = lines(&["a", "Y", "c", "D", "e"]);

        let first = merge_three_way(&base, &ours, &theirs);
        let second = merge_three_way(&base, &ours, &theirs);
        assert_eq!(first, second);
    }

    #[test]
    fn test_merge_reports_all_conflicts() {
        let base = lines(&["a", "b", "c", "d", "e"]);
        let ours = lines(&["A1", "b", "c", "d", "E1"]);
        let theirs = lines(&["A2", "b", "c", "d", "E2"]);

        match merge_three_way(&base, &ours, &theirs) {
            MergeOutcome::Conflicts(regions) => {
                assert_eq!(regions.len(), 2);
                assert!(regions[0].base_start < regions[1].base_start);
            }
            other => panic!("expected conflicts, got {other:?}"),
        }
    }

    #[test]
    fn test_merge_empty_base_both_sides_add_same() {
        let added = lines(&["fresh start"]);
        match merge_three_way(&[], &added, &added) {
            MergeOutcome::Merged(result) => assert_eq!(result, added),
            other => panic!("expected merge, got {other:?}"),
        }
    }

    #[test]
    fn test_merge_empty_base_different_additions_conflict() {
        let ours = lines(&["our opening"]);
        let theirs = lines(&["their opening"]);
        assert!(matches!(
            merge_three_way(&[], &ours, &theirs),
            MergeOutcome::Conflicts(_)
        ));
    }

    #[test]
    fn test_merge_large_disjoint_document() {
        let base: Vec<String> = (0..200).map(|i| format!("line {i}")).collect();
        let mut ours = base.clone();
        ours[10] = "ours edit".into();
        let mut theirs = base.clone();
        theirs[150] = "theirs edit".into();

        match merge_three_way(&base, &ours, &theirs) {
            MergeOutcome::Merged(result) => {
                assert_eq!(result[10], "ours edit");
                assert_eq!(result[150], "theirs edit");
                assert_eq!(result.len(), 200);
            }
            other => panic!("expected merge, got {other:?}"),
        }
    }
}
