use crate::model::*;

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`. Both sorted by start; `to_remove` disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

/// Sort then merge. Convenience for unsorted busy lists.
pub fn normalize(mut spans: Vec<Span>) -> Vec<Span> {
    spans.sort_by_key(|s| s.start);
    merge_overlapping(&spans)
}

/// Does `span` overlap anything in `disjoint` (sorted, merged)?
pub fn overlaps_any(disjoint: &[Span], span: &Span) -> bool {
    // First interval whose end is past our start is the only candidate.
    let idx = disjoint.partition_point(|s| s.end <= span.start);
    disjoint.get(idx).is_some_and(|s| s.overlaps(span))
}

/// Is `span` entirely inside one interval of `disjoint` (sorted, merged)?
pub fn fits_within_any(disjoint: &[Span], span: &Span) -> bool {
    let idx = disjoint.partition_point(|s| s.end < span.end);
    disjoint.get(idx).is_some_and(|s| s.contains_span(span))
}
