use voxcel_dag::{AnchorEdges, DagError, DependencyGraph, PlanStep};
use voxcel_primitives::{Anchor, CellBox, CellKey};

fn key(arr: u32, x: u32, y: u32) -> CellKey {
    CellKey::at(arr, x, y, 0)
}

fn anchor(arr: u32, x: u32, y: u32) -> Anchor {
    Anchor::from(key(arr, x, y))
}

#[test]
fn test_dependency_maps_stay_inverse() {
    let mut graph = DependencyGraph::new();
    let c1 = anchor(1, 2, 0);
    let range = graph
        .expand_box(CellBox::spanning(key(1, 0, 0), key(1, 1, 1)))
        .expect("expand");
    graph.set_dependencies(c1, range.clone());

    let deps = graph.dependencies_of(c1).expect("deps");
    assert_eq!(deps.len(), 4);
    for cell in range {
        assert!(graph.dependents_of(cell).any(|a| a == c1));
    }
    assert!(graph.is_consistent());
}

#[test]
fn test_restored_edges_replace_current_ones() {
    let mut graph = DependencyGraph::new();
    let c1 = anchor(1, 2, 0);
    graph.set_dependencies(c1, [key(1, 0, 0)]);
    graph.set_global_dependencies(c1, ["score"]);
    let saved = graph.edges_of(c1);

    graph.set_dependencies(c1, [key(1, 5, 5)]);
    graph.remove_anchor(c1);
    assert!(graph.edges_of(c1).is_empty());

    graph.restore_edges(c1, saved.clone());
    assert_eq!(graph.edges_of(c1), saved);
    assert!(graph.dependents_of(key(1, 0, 0)).any(|a| a == c1));
    assert!(graph.dependents_of(key(1, 5, 5)).next().is_none());
    assert!(graph.is_consistent());

    graph.restore_edges(c1, AnchorEdges::default());
    assert!(graph.dependencies_of(c1).is_none());
}

#[test]
fn test_plan_is_minimal() {
    // A1 <- B1 <- C1, and an unrelated D5 <- E5.
    let mut graph = DependencyGraph::new();
    graph.set_dependencies(anchor(1, 1, 0), [key(1, 0, 0)]);
    graph.set_dependencies(anchor(1, 2, 0), [key(1, 1, 0)]);
    graph.set_dependencies(anchor(1, 4, 4), [key(1, 3, 4)]);

    let plan = graph.plan(&[key(1, 0, 0)], &[]);
    let touched: Vec<Anchor> = plan.evaluated().collect();
    assert_eq!(touched, vec![anchor(1, 1, 0), anchor(1, 2, 0)]);
    assert_eq!(plan.cyclic().count(), 0);
}

#[test]
fn test_plan_respects_diamond_order() {
    // B1 and C1 both read A1, D1 reads B1 and C1.
    let mut graph = DependencyGraph::new();
    graph.set_dependencies(anchor(1, 1, 0), [key(1, 0, 0)]);
    graph.set_dependencies(anchor(1, 2, 0), [key(1, 0, 0)]);
    graph.set_dependencies(anchor(1, 3, 0), [key(1, 1, 0), key(1, 2, 0)]);

    let plan = graph.plan(&[key(1, 0, 0)], &[]);
    let order: Vec<Anchor> = plan.evaluated().collect();
    let position = |a: Anchor| order.iter().position(|x| *x == a).expect("present");
    assert!(position(anchor(1, 3, 0)) > position(anchor(1, 1, 0)));
    assert!(position(anchor(1, 3, 0)) > position(anchor(1, 2, 0)));
}

#[test]
fn test_indirect_cycle_is_marked_not_evaluated() {
    let mut graph = DependencyGraph::new();
    let a1 = anchor(1, 0, 0);
    let b1 = anchor(1, 1, 0);
    let c1 = anchor(1, 2, 0);
    graph.set_dependencies(a1, [key(1, 1, 0)]);
    graph.set_dependencies(b1, [key(1, 0, 0)]);
    // C1 reads the cycle but is not part of it.
    graph.set_dependencies(c1, [key(1, 1, 0)]);

    let plan = graph.plan(&[], &[b1]);
    let cyclic: Vec<Anchor> = plan.cyclic().collect();
    assert_eq!(cyclic, vec![a1, b1]);

    let last = plan.steps.last().copied().expect("steps");
    assert_eq!(last, PlanStep::Evaluate(c1));
}

#[test]
fn test_chain_behind_cycle_runs_in_order() {
    let mut graph = DependencyGraph::new();
    let a1 = anchor(1, 0, 0);
    let b1 = anchor(1, 1, 0);
    let d1 = anchor(1, 3, 0);
    let e1 = anchor(1, 4, 0);
    graph.set_dependencies(a1, [key(1, 1, 0)]);
    graph.set_dependencies(b1, [key(1, 0, 0)]);
    graph.set_dependencies(e1, [key(1, 3, 0)]);
    graph.set_dependencies(d1, [key(1, 0, 0)]);

    let plan = graph.plan(&[], &[a1]);
    assert_eq!(plan.cyclic().collect::<Vec<_>>(), vec![a1, b1]);
    assert_eq!(plan.evaluated().collect::<Vec<_>>(), vec![d1, e1]);
}

#[test]
fn test_cycle_does_not_touch_unrelated_anchor() {
    let mut graph = DependencyGraph::new();
    graph.set_dependencies(anchor(1, 0, 0), [key(1, 1, 0)]);
    graph.set_dependencies(anchor(1, 1, 0), [key(1, 0, 0)]);
    graph.set_dependencies(anchor(1, 9, 9), [key(1, 8, 8)]);

    let plan = graph.plan(&[key(1, 0, 0)], &[]);
    assert!(!plan.anchors().contains(&anchor(1, 9, 9)));
}

#[test]
fn test_purge_array_drops_edges_in_both_directions() {
    let mut graph = DependencyGraph::new();
    // Anchor in array 2 reading array 1, anchor in array 1 reading array 2.
    graph.set_dependencies(anchor(2, 0, 0), [key(1, 0, 0)]);
    graph.set_dependencies(anchor(1, 5, 5), [key(2, 1, 1), key(1, 4, 4)]);
    graph.set_global_dependencies(anchor(2, 3, 3), ["score"]);

    graph.purge_array(2);

    assert!(!graph.has_anchor(anchor(2, 0, 0)));
    assert_eq!(graph.anchors_reading_global("score").count(), 0);
    let remaining = graph.dependencies_of(anchor(1, 5, 5)).expect("kept");
    assert_eq!(remaining.iter().copied().collect::<Vec<_>>(), vec![key(1, 4, 4)]);
    assert!(graph.is_consistent());
}

#[test]
fn test_remap_keys_moves_anchor_and_inputs() {
    let mut graph = DependencyGraph::new();
    graph.set_dependencies(anchor(1, 4, 0), [key(1, 3, 0)]);
    graph.remap_keys(|k| {
        if k.coord.x >= 3 {
            CellKey::at(k.arr, k.coord.x + 2, k.coord.y, k.coord.z)
        } else {
            k
        }
    });
    assert!(graph.has_anchor(anchor(1, 6, 0)));
    assert_eq!(graph.dependents_of(key(1, 5, 0)).count(), 1);
    assert!(graph.is_consistent());
}

#[test]
fn test_range_limit_is_configurable() {
    let graph = DependencyGraph::with_max_range_cells(8);
    assert!(graph
        .expand_box(CellBox::spanning(key(1, 0, 0), key(1, 1, 3)))
        .is_ok());
    let err = graph
        .expand_box(CellBox::spanning(key(1, 0, 0), key(1, 2, 2)))
        .expect_err("too large");
    assert!(matches!(err, DagError::RangeTooLarge { cells: 9, .. }));
}
