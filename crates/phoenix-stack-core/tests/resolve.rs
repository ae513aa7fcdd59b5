//! Ordering properties of the resolver over generated graphs.

use phoenix_stack_common::ResourceKind;
use phoenix_stack_core::{AttrRef, Declaration, Error, NodeId, Registry, resolve};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

const KINDS: [ResourceKind; 4] = [
    ResourceKind::Role,
    ResourceKind::Bucket,
    ResourceKind::LogGroup,
    ResourceKind::Secret,
];

/// A random DAG declared in shuffled order. Edges only go from a lower to a
/// higher rank, half as explicit dependencies and half as attribute refs.
fn random_dag(seed: u64, size: usize) -> Registry {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut declarations: Vec<Declaration> = (0..size)
        .map(|rank| {
            let mut decl = Declaration::new(KINDS[rank % KINDS.len()]).id(format!("n{rank}"));
            for dep in 0..rank {
                if rng.gen_bool(0.25) {
                    let dep = NodeId::new(format!("n{dep}"));
                    decl = if rng.gen_bool(0.5) {
                        decl.depends_on(&dep)
                    } else {
                        decl.attr(format!("ref{dep}"), AttrRef::arn(&dep))
                    };
                }
            }
            decl
        })
        .collect();
    declarations.shuffle(&mut rng);

    let mut reg = Registry::new();
    for decl in declarations {
        reg.register(decl).unwrap();
    }
    reg
}

fn declared_edge(reg: &Registry, from: &NodeId, to: &NodeId) -> bool {
    let dependent = reg.get(to).unwrap();
    dependent.depends_on().contains(from)
        || dependent.references().iter().any(|(_, r)| r.target() == from)
}

#[test]
fn test_every_edge_respects_creation_order() {
    for seed in 0..40 {
        let reg = random_dag(seed, 24);
        let plan = resolve(&reg).unwrap();
        let order = plan.creation_order();
        assert_eq!(order.len(), reg.len());

        let position = |id: &NodeId| order.iter().position(|o| o == id).unwrap();
        for edge in plan.edges() {
            assert!(
                position(edge.from) < position(edge.to),
                "seed {seed}: {} not before {}",
                edge.from,
                edge.to
            );
            assert!(declared_edge(&reg, edge.from, edge.to));
        }
    }
}

#[test]
fn test_resolve_is_idempotent() {
    for seed in 0..20 {
        let reg = random_dag(seed, 16);
        let first = resolve(&reg).unwrap();
        let second = resolve(&reg).unwrap();
        assert_eq!(first.creation_order(), second.creation_order());
        assert_eq!(first.edge_count(), second.edge_count());
    }
}

#[test]
fn test_destruction_order_is_reverse() {
    let reg = random_dag(7, 20);
    let plan = resolve(&reg).unwrap();
    let mut reversed = plan.creation_order().to_vec();
    reversed.reverse();
    assert_eq!(plan.destruction_order(), reversed);
}

#[test]
fn test_back_edge_yields_valid_cycle_path() {
    for seed in 0..20 {
        let mut reg = random_dag(seed, 12);
        // loop-b and loop-c depend on each other; loop-a hangs off the DAG.
        reg.register(
            Declaration::new(ResourceKind::Role)
                .id("loop-a")
                .depends_on(&NodeId::from("n0")),
        )
        .unwrap();
        reg.register(
            Declaration::new(ResourceKind::Role)
                .id("loop-b")
                .attr("target", AttrRef::arn(&NodeId::from("loop-a")))
                .attr("peer", AttrRef::arn(&NodeId::from("loop-c"))),
        )
        .unwrap();
        reg.register(
            Declaration::new(ResourceKind::Role)
                .id("loop-c")
                .depends_on(&NodeId::from("loop-b")),
        )
        .unwrap();

        let Err(Error::Cycle { path }) = resolve(&reg) else {
            panic!("seed {seed}: expected a cycle");
        };
        assert!(path.len() >= 3, "seed {seed}: {path:?}");
        assert_eq!(path.first(), path.last());
        for pair in path.windows(2) {
            assert!(
                declared_edge(&reg, &pair[0], &pair[1]),
                "seed {seed}: {} -> {} is not an edge",
                pair[0],
                pair[1]
            );
        }
    }
}

#[test]
fn test_missing_target_is_unresolved() {
    let mut reg = random_dag(3, 8);
    reg.register(
        Declaration::new(ResourceKind::Service)
            .id("svc")
            .attr("role", AttrRef::arn(&NodeId::from("nowhere"))),
    )
    .unwrap();
    let Err(Error::UnresolvedReference { node, reference }) = resolve(&reg) else {
        panic!("expected an unresolved reference");
    };
    assert_eq!(node.as_str(), "svc");
    assert_eq!(reference, "nowhere.arn");
}
