//! # Hierarchy Benchmarks
//!
//! Performance benchmarks for evalsys-core hierarchy and access queries.
//!
//! Run with: `cargo bench -p evalsys-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use evalsys_core::{AccessControl, EvalGroupId, Hierarchy, NodeBindings, NodeId, Permission, UserId};
use std::hint::black_box;

/// Build a tree with `fanout` children per node, `depth` levels deep.
///
/// Every leaf gets one group; every tenth node gets a permission grant.
fn create_tree(fanout: usize, depth: usize) -> (Hierarchy, NodeBindings, Vec<NodeId>) {
    let mut tree = Hierarchy::new("bench");
    let mut bindings = NodeBindings::new();
    let root = tree.create_root("Root", "").expect("root");
    let mut all = vec![root];
    let mut level = vec![root];

    for _ in 0..depth {
        let mut next = Vec::with_capacity(level.len() * fanout);
        for parent in &level {
            for _ in 0..fanout {
                let child = tree.add_node(*parent, "Node", "", None).expect("add");
                next.push(child);
            }
        }
        all.extend(next.iter().copied());
        level = next;
    }

    for leaf in &level {
        bindings.add_node_groups(*leaf, [EvalGroupId::new(format!("group-{}", leaf.0))]);
    }
    for (i, id) in all.iter().enumerate() {
        if i % 10 == 0 {
            bindings.grant_permission(
                UserId::new(format!("user-{i}")),
                *id,
                Permission::new("view_node_data"),
            );
        }
    }

    (tree, bindings, all)
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_node_insertion(c: &mut Criterion) {
    let mut group = c.benchmark_group("node_insertion");

    for depth in [2, 3, 4].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(depth), depth, |b, &depth| {
            b.iter(|| black_box(create_tree(6, depth)));
        });
    }

    group.finish();
}

fn bench_child_nodes(c: &mut Criterion) {
    let mut group = c.benchmark_group("child_nodes");

    for depth in [2, 3, 4].iter() {
        let (tree, bindings, all) = create_tree(6, *depth);
        let access = AccessControl::new(&tree, &bindings);
        let root = all[0];

        group.bench_with_input(BenchmarkId::new("direct", depth), depth, |b, _| {
            b.iter(|| black_box(access.child_nodes(black_box(root), true)));
        });
        group.bench_with_input(BenchmarkId::new("transitive", depth), depth, |b, _| {
            b.iter(|| black_box(access.child_nodes(black_box(root), false)));
        });
    }

    group.finish();
}

fn bench_groups_under_nodes(c: &mut Criterion) {
    let mut group = c.benchmark_group("groups_under_nodes");

    for depth in [2, 3, 4].iter() {
        let (tree, bindings, all) = create_tree(6, *depth);
        let access = AccessControl::new(&tree, &bindings);

        group.bench_with_input(BenchmarkId::new("sets", depth), depth, |b, _| {
            b.iter(|| black_box(access.groups_under_nodes(black_box(&all))));
        });
        group.bench_with_input(BenchmarkId::new("counts", depth), depth, |b, _| {
            b.iter(|| black_box(access.count_groups_under_nodes(black_box(&all))));
        });
    }

    group.finish();
}

fn bench_permission_lookup(c: &mut Criterion) {
    let (tree, bindings, all) = create_tree(6, 4);
    let access = AccessControl::new(&tree, &bindings);
    let permission = Permission::new("view_node_data");
    let deepest = all.last().copied().unwrap_or(NodeId(0));

    c.bench_function("user_ids_with_permission", |b| {
        b.iter(|| black_box(access.user_ids_with_permission(black_box(&all), &permission)));
    });
    c.bench_function("has_permission_inherited", |b| {
        let user = UserId::new("user-0");
        b.iter(|| {
            black_box(access.has_permission_inherited(&user, black_box(deepest), &permission))
        });
    });
}

criterion_group!(
    benches,
    bench_node_insertion,
    bench_child_nodes,
    bench_groups_under_nodes,
    bench_permission_lookup,
);
criterion_main!(benches);
