//! Integration tests for itree-core
//!
//! These tests load oracle snapshots from `tests/fixtures` and exercise the
//! full snapshot → build → rank → serialize workflow.

use std::path::PathBuf;

use itree_core::{
    build_itree, BuildContext, CountType, Error, FunnelRequest, ItreeConfig, MemoryOracle,
    MemoryPattern, NodeType, Pattern, PropertyScope,
};

const TOLERANCE: f64 = 1e-4;

fn fixture(name: &str) -> MemoryOracle {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    MemoryOracle::load(&path).expect("Failed to load fixture snapshot")
}

fn build<'o>(
    oracle: &'o MemoryOracle,
    request: &FunnelRequest,
) -> itree_core::BuildOutcome<'o, MemoryPattern> {
    build_itree(oracle, request, &ItreeConfig::default(), &BuildContext::new())
        .expect("Failed to build tree")
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < TOLERANCE,
        "expected {expected}, got {actual}"
    );
}

// =============================================================================
// Sequence Trees
// =============================================================================

#[test]
fn test_end_event_tree() {
    let oracle = fixture("golden_funnel.json");
    let outcome = build(&oracle, &FunnelRequest::new("Y"));
    let tree = &outcome.tree;

    let shape: Vec<(String, Option<usize>)> = tree
        .nodes()
        .iter()
        .map(|n| (n.label(), n.parent_index))
        .collect();
    let expected = [
        ("Y", None),
        ("A,Y", Some(0)),
        ("B,Y", Some(0)),
        ("C,Y", Some(0)),
        ("A,C,Y", Some(1)),
        ("A,B,Y", Some(1)),
        ("B,A,Y", Some(2)),
        ("B,C,Y", Some(2)),
        ("C,B,Y", Some(3)),
        ("A,C,B,Y", Some(4)),
        ("A,B,C,Y", Some(5)),
        ("B,A,C,Y", Some(6)),
    ];
    let expected: Vec<(String, Option<usize>)> = expected
        .iter()
        .map(|(label, parent)| (label.to_string(), *parent))
        .collect();
    assert_eq!(shape, expected);

    let root = tree.root().unwrap();
    assert_eq!(root.node_type, NodeType::Root);
    assert_close(root.right_information, 0.97095);
    assert_close(root.confidence, 0.6);

    let a_y = tree.node(1).unwrap();
    assert_eq!(a_y.node_type, NodeType::SequenceChild);
    assert_close(a_y.information_drop, 0.07898);
    assert_close(a_y.overall_information, 0.89197);
    assert_close(a_y.confidence_gain, -0.155556);

    let a_c_y = tree.node(4).unwrap();
    assert_close(a_c_y.information_drop, 0.59001);
    assert_close(a_c_y.confidence, 0.8);
    assert_close(a_c_y.overall_information, 0.40107);

    assert_close(tree.node(5).unwrap().information_drop, 0.22479);
    assert_close(tree.node(9).unwrap().information_drop, 0.07291);
    assert_close(tree.node(10).unwrap().information_drop, 0.46957);
}

#[test]
fn test_start_to_end_tree() {
    let oracle = fixture("golden_funnel.json");
    let outcome = build(&oracle, &FunnelRequest::new("Y").with_start("A"));
    let tree = &outcome.tree;

    let labels: Vec<String> = tree.nodes().iter().map(|n| n.label()).collect();
    assert_eq!(labels, vec!["A,Y", "A,C,Y", "A,B,Y", "A,C,B,Y", "A,B,C,Y"]);
    let parents: Vec<Option<usize>> = tree.nodes().iter().map(|n| n.parent_index).collect();
    assert_eq!(parents, vec![None, Some(0), Some(0), Some(1), Some(2)]);

    // Every node keeps the start event first and the end event last
    for node in tree.nodes() {
        assert_eq!(node.event_names().first().map(String::as_str), Some("A"));
        assert_eq!(node.event_names().last().map(String::as_str), Some("Y"));
    }
}

#[test]
fn test_every_node_has_nested_frequencies() {
    let oracle = fixture("golden_funnel.json");
    let outcome = build(&oracle, &FunnelRequest::new("Y"));

    // The root only carries child-side counts
    for node in outcome.tree.nodes().iter().skip(1) {
        assert!(node.frequencies.is_nested(), "{} not nested", node.label());
        assert!(node.information_drop > 0.0);
        assert!(node.parent_index.unwrap() < node.index);
        assert_eq!(node.constraints.len(), node.len());
    }
}

#[test]
fn test_path_and_ranking() {
    let oracle = fixture("golden_funnel.json");
    let outcome = build(&oracle, &FunnelRequest::new("Y"));
    let tree = &outcome.tree;

    assert_eq!(tree.path_to_root(10), vec![10, 5, 1, 0]);
    assert_eq!(tree.children(0).count(), 3);

    let ranked = tree.ranked_insights();
    assert_eq!(ranked.len(), tree.len() - 1);
    assert!(ranked.iter().all(|n| n.node_type != NodeType::Root));
    for pair in ranked.windows(2) {
        assert!(pair[0].weighted_drop() >= pair[1].weighted_drop());
    }
}

#[test]
fn test_debug_counts_for_full_build() {
    let oracle = fixture("golden_funnel.json");
    let outcome = build(&oracle, &FunnelRequest::new("Y"));
    let debug = &outcome.debug;

    assert_eq!(debug.total_patterns, 12);
    assert_eq!(debug.patterns_by_length[&4], 3);
    assert_eq!(debug.nodes_evaluated, outcome.tree.len());
    assert_eq!(debug.by_depth[&0].sequence_children, 3);
    assert_eq!(debug.campaign.calls, 1);
}

// =============================================================================
// Property Splits
// =============================================================================

#[test]
fn test_property_children_in_full_build() {
    let oracle = fixture("plan_funnel.json");
    let outcome = build(&oracle, &FunnelRequest::new("Y"));
    let tree = &outcome.tree;

    let types: Vec<NodeType> = tree.nodes().iter().map(|n| n.node_type).collect();
    assert_eq!(
        types,
        vec![
            NodeType::Root,
            NodeType::UserPropertyChild,
            NodeType::UserPropertyChild,
            NodeType::SequenceChild,
            NodeType::EventPropertyChild,
        ]
    );

    let plan = tree.node(1).unwrap();
    assert_eq!(plan.added_constraint.user_categorical[0].property_value, "pro");
    assert_close(plan.confidence, 1.0);

    let source = tree.node(4).unwrap();
    assert_eq!(source.parent_index, Some(3));
    assert_eq!(source.label(), "A,Y");
    // The constraint sits on the event right before the end event
    assert_eq!(
        source.constraints[0].event_categorical[0].property_value,
        "ads"
    );
    assert!(source.constraints[1].is_empty());

    assert_eq!(outcome.debug.by_depth[&0].property_children, 2);
    assert_eq!(outcome.debug.by_depth[&1].property_children, 1);
}

#[test]
fn test_preferred_property_keeps_drop_ranking() {
    let oracle = fixture("plan_funnel.json");
    let request = FunnelRequest::new("Y").with_preferred_property(PropertyScope::User, "age");
    let outcome = build(&oracle, &request);

    let first = outcome.tree.node(1).unwrap();
    assert_eq!(first.node_type, NodeType::UserPropertyChild);
    assert!(first.added_constraint.property_names().contains("plan"));
    // Preference only orders generation within a group
    assert_eq!(outcome.debug.by_depth[&0].properties.user_numeric_considered, 1);
}

#[test]
fn test_ignored_property_filter() {
    let oracle = fixture("plan_funnel.json");
    let mut config = ItreeConfig::default();
    config.properties.ignored.insert("plan".to_string());

    let outcome = build_itree(
        &oracle,
        &FunnelRequest::new("Y"),
        &config,
        &BuildContext::new(),
    )
    .unwrap();

    assert!(outcome
        .tree
        .nodes()
        .iter()
        .all(|n| !n.added_constraint.property_names().contains("plan")));
    assert_eq!(outcome.debug.by_depth[&0].property_children, 1);
}

#[test]
fn test_per_occurrence_root_skips_user_properties() {
    let oracle = fixture("plan_funnel.json");
    let request = FunnelRequest::new("Y").with_count_type(CountType::PerOccurrence);
    let outcome = build(&oracle, &request);

    assert!(outcome
        .tree
        .children(0)
        .all(|n| n.node_type != NodeType::UserPropertyChild));
}

// =============================================================================
// Snapshots and Output
// =============================================================================

#[test]
fn test_tree_serializes_to_json() {
    let oracle = fixture("golden_funnel.json");
    let outcome = build(&oracle, &FunnelRequest::new("Y").with_start("A"));

    let json = serde_json::to_value(&outcome.tree).unwrap();
    assert_eq!(json["end_event"], "Y");
    let nodes = json["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 5);
    assert_eq!(nodes[0]["pattern"], serde_json::json!(["A", "Y"]));
    assert_eq!(nodes[0]["node_type"], "root");
    assert!(nodes[0]["parent_index"].is_null());
    assert_eq!(nodes[1]["parent_index"], 0);
    assert!(nodes[1]["fpp"].is_number());
    assert!(nodes[1].get("graph").is_none());

    let debug = serde_json::to_value(&outcome.debug).unwrap();
    assert!(debug["built_at"].is_string());
}

#[test]
fn test_snapshot_round_trip_keeps_tree() {
    let oracle = fixture("plan_funnel.json");
    let reloaded = MemoryOracle::from_json(&oracle.to_json().unwrap()).unwrap();

    let before = build(&oracle, &FunnelRequest::new("Y"));
    let after = build(&reloaded, &FunnelRequest::new("Y"));
    let drops = |tree: &itree_core::Itree<'_, MemoryPattern>| -> Vec<f64> {
        tree.nodes().iter().map(|n| n.information_drop).collect()
    };
    assert_eq!(drops(&before.tree), drops(&after.tree));
    assert_eq!(
        reloaded.patterns().iter().map(|p| p.total_user_count()).max(),
        Some(10)
    );
}

#[test]
fn test_snapshot_errors() {
    let missing = MemoryOracle::load(&PathBuf::from("/nonexistent/snapshot.json"));
    assert!(matches!(missing, Err(Error::Io(_))));

    let malformed = MemoryOracle::from_json("{ not json");
    assert!(matches!(malformed, Err(Error::Json(_))));

    let duplicate = MemoryOracle::from_json(
        r#"{
            "total_user_count": 2,
            "total_event_count": 2,
            "patterns": [
                {"event_names": ["Y"], "per_user_count": 1, "per_occurrence_count": 1},
                {"event_names": ["Y"], "per_user_count": 2, "per_occurrence_count": 2}
            ]
        }"#,
    );
    assert!(matches!(duplicate, Err(Error::InvalidData(_))));
}

#[test]
fn test_build_errors() {
    let oracle = fixture("golden_funnel.json");
    let config = ItreeConfig::default();
    let context = BuildContext::new();

    let result = build_itree(&oracle, &FunnelRequest::new(""), &config, &context);
    assert!(matches!(result, Err(Error::MissingEndEvent)));

    let result = build_itree(&oracle, &FunnelRequest::new("Z"), &config, &context);
    assert!(matches!(result, Err(Error::RootPatternNotFound { .. })));
}
