//! Best-first route sequencing: exact A* for small order sets, a
//! beam-limited variant above that.
//!
//! The search solves the open traveling-salesman ordering for one
//! courier: start at the courier's position, visit every assigned order
//! exactly once, no return leg. The heuristic (nearest unvisited order
//! plus the minimum spanning tree of the unvisited set) never
//! overestimates, so the exact regime returns an optimal ordering.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::cache::DistanceCache;
use crate::greedy;
use crate::{Courier, Error, OptimizeResponse, Order};

/// Above this route length the exact search gives way to beam search.
const EXACT_ORDER_LIMIT: usize = 8;
/// Safety bound on exact-search node expansions.
const MAX_EXPANSIONS: usize = 50_000;
const BEAM_WIDTH: usize = 100;

/// Greedy assignment followed by A* sequencing per courier.
pub fn optimize_astar(orders: &[Order], couriers: &[Courier]) -> Result<OptimizeResponse, Error> {
    if orders.is_empty() {
        return Ok(OptimizeResponse {
            assignments: Vec::new(),
            total_distance_before: 0.0,
            total_distance_after: 0.0,
        });
    }
    if couriers.is_empty() {
        return Err(Error::InvalidInput("no couriers provided".to_string()));
    }

    let cache = DistanceCache::new(orders, couriers);
    let routes: Vec<Vec<usize>> = greedy::assign(&cache)
        .into_iter()
        .enumerate()
        .map(|(courier_idx, assigned)| sequence_astar(&cache, courier_idx, &assigned))
        .collect();

    Ok(greedy::build_response(&cache, orders, couriers, &routes))
}

/// Sequences one courier's orders. Never fails: the worst case falls
/// back to the greedy ordering.
pub(crate) fn sequence_astar(
    cache: &DistanceCache,
    courier_idx: usize,
    orders: &[usize],
) -> Vec<usize> {
    if orders.len() <= 1 {
        return orders.to_vec();
    }
    if orders.len() <= EXACT_ORDER_LIMIT {
        exact_search(cache, courier_idx, orders)
    } else {
        beam_search(cache, courier_idx, orders, BEAM_WIDTH)
    }
}

#[derive(Clone, PartialEq)]
struct SearchNode {
    route: Vec<usize>,
    remaining: Vec<usize>,
    g: f64,
    f: f64,
}

impl Eq for SearchNode {}

impl Ord for SearchNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the binary heap pops the lowest f first.
        other
            .f
            .partial_cmp(&self.f)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.route.cmp(&self.route))
    }
}

impl PartialOrd for SearchNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn exact_search(cache: &DistanceCache, courier_idx: usize, orders: &[usize]) -> Vec<usize> {
    let mut open = BinaryHeap::new();
    let h = heuristic(cache, courier_idx, None, orders);
    open.push(SearchNode {
        route: Vec::new(),
        remaining: orders.to_vec(),
        g: 0.0,
        f: h,
    });

    let mut best_route = orders.to_vec();
    let mut best_cost = f64::MAX;
    let mut expansions = 0;

    while let Some(node) = open.pop() {
        if expansions >= MAX_EXPANSIONS {
            break;
        }
        expansions += 1;

        if node.remaining.is_empty() {
            if node.g < best_cost {
                best_cost = node.g;
                best_route = node.route;
            }
            continue;
        }

        if node.g >= best_cost {
            continue;
        }

        for child in expand(cache, courier_idx, &node) {
            if child.f < best_cost {
                open.push(child);
            }
        }
    }

    best_route
}

/// Level-synchronous expansion keeping only the `width` lowest-f nodes
/// per level. Seeded with the greedy route so the result never regresses
/// below it.
fn beam_search(
    cache: &DistanceCache,
    courier_idx: usize,
    orders: &[usize],
    width: usize,
) -> Vec<usize> {
    let mut best_route = greedy::sequence(cache, courier_idx, orders);
    let mut best_cost = cache.route_distance(courier_idx, &best_route);

    let h = heuristic(cache, courier_idx, None, orders);
    let mut beam = vec![SearchNode {
        route: Vec::new(),
        remaining: orders.to_vec(),
        g: 0.0,
        f: h,
    }];

    while !beam.is_empty() {
        let mut next = Vec::new();

        for node in &beam {
            if node.remaining.is_empty() {
                if node.g < best_cost {
                    best_cost = node.g;
                    best_route = node.route.clone();
                }
                continue;
            }
            next.extend(expand(cache, courier_idx, node));
        }

        next.sort_by(|a, b| a.f.partial_cmp(&b.f).unwrap_or(Ordering::Equal));
        next.truncate(width);
        beam = next;
    }

    best_route
}

fn expand(cache: &DistanceCache, courier_idx: usize, node: &SearchNode) -> Vec<SearchNode> {
    let mut children = Vec::with_capacity(node.remaining.len());

    for (i, &order_idx) in node.remaining.iter().enumerate() {
        let move_cost = match node.route.last() {
            Some(&at) => cache.order_to_order(at, order_idx),
            None => cache.courier_to_order(courier_idx, order_idx),
        };

        let mut remaining = Vec::with_capacity(node.remaining.len() - 1);
        remaining.extend_from_slice(&node.remaining[..i]);
        remaining.extend_from_slice(&node.remaining[i + 1..]);

        let mut route = Vec::with_capacity(node.route.len() + 1);
        route.extend_from_slice(&node.route);
        route.push(order_idx);

        let g = node.g + move_cost;
        let h = heuristic(cache, courier_idx, Some(order_idx), &remaining);
        children.push(SearchNode {
            route,
            remaining,
            g,
            f: g + h,
        });
    }

    children
}

/// Admissible remaining-cost estimate: one edge out of the current
/// position is unavoidable, and any path through the unvisited set
/// weighs at least its minimum spanning tree.
fn heuristic(
    cache: &DistanceCache,
    courier_idx: usize,
    at: Option<usize>,
    remaining: &[usize],
) -> f64 {
    if remaining.is_empty() {
        return 0.0;
    }

    let mut min_dist = f64::MAX;
    for &order_idx in remaining {
        let dist = match at {
            Some(from) => cache.order_to_order(from, order_idx),
            None => cache.courier_to_order(courier_idx, order_idx),
        };
        if dist < min_dist {
            min_dist = dist;
        }
    }

    min_dist + mst_lower_bound(cache, remaining)
}

/// Prim's algorithm over the order-to-order graph restricted to `nodes`.
fn mst_lower_bound(cache: &DistanceCache, nodes: &[usize]) -> f64 {
    if nodes.len() <= 1 {
        return 0.0;
    }

    let mut in_tree = vec![false; nodes.len()];
    in_tree[0] = true;
    let mut tree_size = 1;
    let mut total = 0.0;

    while tree_size < nodes.len() {
        let mut min_edge = f64::MAX;
        let mut next = None;

        for (i, &from) in nodes.iter().enumerate() {
            if !in_tree[i] {
                continue;
            }
            for (j, &to) in nodes.iter().enumerate() {
                if in_tree[j] {
                    continue;
                }
                let dist = cache.order_to_order(from, to);
                if dist < min_edge {
                    min_edge = dist;
                    next = Some(j);
                }
            }
        }

        match next {
            Some(j) => {
                in_tree[j] = true;
                tree_size += 1;
                total += min_edge;
            }
            None => break,
        }
    }

    total
}
