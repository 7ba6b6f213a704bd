// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Filter pipeline planner.
//
// Given a source MIME type and the set of types a printer accepts, search
// the conversion graph (database records plus any PPD-declared filters) for
// the cheapest chain of converters. Nodes are MIME types, edges are
// conversion records, and costs are non-negative, so Dijkstra suffices.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use tracing::debug;

use crate::db::Conversion;
use crate::{CUPS_RASTER, OCTET_STREAM, PWG_RASTER};

/// A planned pipeline: conversion stages in execution order plus the MIME
/// type the final stage emits. An empty stage list means the document is
/// already acceptable and should be copied verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPipeline {
    pub stages: Vec<Conversion>,
    pub final_mime: String,
    pub total_cost: i64,
}

/// Plan a conversion pipeline from `source` to something the printer
/// accepts.
///
/// Candidate targets are tried in a fixed order: the raster pair when
/// `force_raster` is set, then each printer-declared type, then
/// `application/octet-stream` as the universal fallback. With
/// `force_raster`, the first reachable raster target wins outright;
/// otherwise the cheapest pipeline over all candidates wins, ties broken by
/// candidate order.
pub fn plan_pipeline(
    conversions: &[Conversion],
    ppd_filters: &[Conversion],
    dest_set: &[String],
    source: &str,
    force_raster: bool,
) -> Option<PlannedPipeline> {
    let source = source.to_ascii_lowercase();

    let mut candidates: Vec<String> = Vec::new();
    if force_raster {
        candidates.push(CUPS_RASTER.to_owned());
        candidates.push(PWG_RASTER.to_owned());
    }
    for dest in dest_set {
        let dest = dest.to_ascii_lowercase();
        if !candidates.contains(&dest) {
            candidates.push(dest);
        }
    }
    if !candidates.contains(&OCTET_STREAM.to_owned()) {
        candidates.push(OCTET_STREAM.to_owned());
    }

    let raster_candidates = if force_raster { 2 } else { 0 };
    let mut best: Option<PlannedPipeline> = None;

    for (index, dest) in candidates.iter().enumerate() {
        let Some(found) = search(conversions, ppd_filters, &source, dest) else {
            continue;
        };

        // A reachable raster target short-circuits the cost comparison.
        if index < raster_candidates {
            debug!(source = %source, dest = %dest, "forced raster pipeline selected");
            return Some(strip_passthrough(found));
        }

        let better = match &best {
            Some(b) => found.total_cost < b.total_cost,
            None => true,
        };
        if better {
            best = Some(found);
        }
    }

    best.map(strip_passthrough)
}

/// Least-cost path from `source` to `dest` over the union of database and
/// PPD-declared conversions. PPD filters without an explicit destination
/// apply to the currently selected target.
fn search(
    conversions: &[Conversion],
    ppd_filters: &[Conversion],
    source: &str,
    dest: &str,
) -> Option<PlannedPipeline> {
    if source == dest {
        return Some(PlannedPipeline {
            stages: Vec::new(),
            final_mime: dest.to_owned(),
            total_cost: 0,
        });
    }

    // Edges in insertion order: database first, then PPD declarations.
    let mut edges: Vec<Conversion> = conversions.to_vec();
    for f in ppd_filters {
        let mut f = f.clone();
        if f.dest.is_empty() {
            f.dest = dest.to_owned();
        }
        edges.push(f);
    }

    let mut adjacency: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, e) in edges.iter().enumerate() {
        adjacency.entry(e.source.as_str()).or_default().push(i);
    }

    // (cost, discovery sequence) keys make tie-breaking follow insertion
    // order deterministically.
    let mut heap: BinaryHeap<Reverse<(i64, u64, String)>> = BinaryHeap::new();
    let mut dist: HashMap<String, i64> = HashMap::new();
    let mut prev: HashMap<String, usize> = HashMap::new();
    let mut seq = 0u64;

    dist.insert(source.to_owned(), 0);
    heap.push(Reverse((0, seq, source.to_owned())));

    while let Some(Reverse((cost, _, node))) = heap.pop() {
        if dist.get(&node).copied().unwrap_or(i64::MAX) < cost {
            continue;
        }
        if node == dest {
            break;
        }
        let Some(out) = adjacency.get(node.as_str()) else {
            continue;
        };
        for &edge_index in out {
            let edge = &edges[edge_index];
            let next_cost = cost + edge.weight();
            if next_cost < dist.get(&edge.dest).copied().unwrap_or(i64::MAX) {
                dist.insert(edge.dest.clone(), next_cost);
                prev.insert(edge.dest.clone(), edge_index);
                seq += 1;
                heap.push(Reverse((next_cost, seq, edge.dest.clone())));
            }
        }
    }

    let total_cost = *dist.get(dest)?;

    // Walk predecessors back to the source.
    let mut stages = Vec::new();
    let mut node = dest.to_owned();
    while node != source {
        let edge_index = *prev.get(&node)?;
        let edge = &edges[edge_index];
        node = edge.source.clone();
        stages.push(edge.clone());
    }
    stages.reverse();

    Some(PlannedPipeline {
        stages,
        final_mime: dest.to_owned(),
        total_cost,
    })
}

/// Drop pass-through stages (empty program or `-`). The final MIME type is
/// unchanged; an empty result means copy verbatim.
fn strip_passthrough(mut pipeline: PlannedPipeline) -> PlannedPipeline {
    pipeline.stages.retain(|s| !s.is_passthrough());
    pipeline
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv(source: &str, dest: &str, cost: i64, program: &str) -> Conversion {
        Conversion {
            source: source.into(),
            dest: dest.into(),
            cost,
            program: program.into(),
        }
    }

    #[test]
    fn finds_cheapest_path() {
        let convs = vec![
            conv("text/plain", "application/postscript", 30, "texttops"),
            conv("text/plain", "application/pdf", 10, "texttopdf"),
            conv("application/pdf", "application/postscript", 10, "pdftops"),
        ];
        let dest = vec!["application/postscript".to_owned()];
        let p = plan_pipeline(&convs, &[], &dest, "text/plain", false).expect("pipeline");
        // texttopdf + pdftops (20) beats texttops (30).
        assert_eq!(p.total_cost, 20);
        assert_eq!(p.stages.len(), 2);
        assert_eq!(p.stages[0].program, "texttopdf");
        assert_eq!(p.stages[1].program, "pdftops");
        assert_eq!(p.final_mime, "application/postscript");
    }

    #[test]
    fn pipeline_composes_end_to_end() {
        let convs = vec![
            conv("a/a", "b/b", 1, "ab"),
            conv("b/b", "c/c", 1, "bc"),
            conv("c/c", "d/d", 1, "cd"),
        ];
        let dest = vec!["d/d".to_owned()];
        let p = plan_pipeline(&convs, &[], &dest, "a/a", false).expect("pipeline");
        assert_eq!(p.stages[0].source, "a/a");
        for pair in p.stages.windows(2) {
            assert_eq!(pair[0].dest, pair[1].source);
        }
        assert_eq!(p.stages.last().expect("stage").dest, p.final_mime);
    }

    #[test]
    fn force_raster_beats_cheaper_alternative() {
        let convs = vec![
            conv("application/pdf", CUPS_RASTER, 50, "pdftoraster"),
            conv("application/pdf", "application/postscript", 10, "pdftops"),
        ];
        let dest = vec!["application/postscript".to_owned()];
        let p = plan_pipeline(&convs, &[], &dest, "application/pdf", true).expect("pipeline");
        assert_eq!(p.final_mime, CUPS_RASTER);
        assert_eq!(p.stages[0].program, "pdftoraster");
    }

    #[test]
    fn source_already_acceptable_yields_empty_pipeline() {
        let dest = vec!["application/pdf".to_owned()];
        let p = plan_pipeline(&[], &[], &dest, "application/pdf", false).expect("pipeline");
        assert!(p.stages.is_empty());
        assert_eq!(p.final_mime, "application/pdf");
        assert_eq!(p.total_cost, 0);
    }

    #[test]
    fn octet_stream_fallback_when_unreachable() {
        let dest = vec!["image/pwg-raster".to_owned()];
        let p = plan_pipeline(&[], &[], &dest, "text/plain", false);
        // No conversions at all: only the octet-stream passthrough remains,
        // which is unreachable too unless source == octet-stream. Planner
        // returns None and the scheduler copies verbatim.
        assert!(p.is_none());
    }

    #[test]
    fn ppd_filter_without_dest_targets_candidate() {
        let filters = vec![conv("application/pdf", "", 5, "vendor-pdf")];
        let dest = vec!["application/vnd.vendor".to_owned()];
        let p = plan_pipeline(&[], &filters, &dest, "application/pdf", false).expect("pipeline");
        assert_eq!(p.final_mime, "application/vnd.vendor");
        assert_eq!(p.stages[0].program, "vendor-pdf");
    }

    #[test]
    fn passthrough_stages_are_dropped() {
        let convs = vec![
            conv("a/a", "b/b", 1, "-"),
            conv("b/b", "c/c", 1, "real"),
        ];
        let dest = vec!["c/c".to_owned()];
        let p = plan_pipeline(&convs, &[], &dest, "a/a", false).expect("pipeline");
        assert_eq!(p.stages.len(), 1);
        assert_eq!(p.stages[0].program, "real");
    }

    #[test]
    fn equal_cost_ties_prefer_candidate_order() {
        let convs = vec![
            conv("x/x", "second/target", 10, "to-second"),
            conv("x/x", "first/target", 10, "to-first"),
        ];
        let dest = vec!["first/target".to_owned(), "second/target".to_owned()];
        let p = plan_pipeline(&convs, &[], &dest, "x/x", false).expect("pipeline");
        assert_eq!(p.final_mime, "first/target");
    }
}
