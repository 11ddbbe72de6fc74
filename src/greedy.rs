//! Deterministic nearest-courier assignment and nearest-neighbor
//! sequencing. The fastest solver path and the reference the other
//! engines are measured against.

use crate::cache::DistanceCache;
use crate::{round2, Assignment, Courier, Error, OptimizeResponse, Order};

/// Assigns orders to couriers and sequences each route greedily.
///
/// Empty orders produce an empty response with zero totals. Couriers
/// must be present when any order is.
pub fn optimize(orders: &[Order], couriers: &[Courier]) -> Result<OptimizeResponse, Error> {
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
    let routes: Vec<Vec<usize>> = assign(&cache)
        .into_iter()
        .enumerate()
        .map(|(courier_idx, assigned)| sequence(&cache, courier_idx, &assigned))
        .collect();

    Ok(build_response(&cache, orders, couriers, &routes))
}

/// Iterates orders in input order, giving each to the nearest courier
/// that still has room. When every courier is full the order goes to
/// the first courier anyway: an overloaded route beats a lost order.
pub(crate) fn assign(cache: &DistanceCache) -> Vec<Vec<usize>> {
    let mut routes: Vec<Vec<usize>> = vec![Vec::new(); cache.courier_count()];

    for order_idx in 0..cache.order_count() {
        let mut best: Option<usize> = None;
        let mut best_dist = f64::MAX;

        for courier_idx in 0..cache.courier_count() {
            if !cache.has_capacity(courier_idx, routes[courier_idx].len()) {
                continue;
            }
            let dist = cache.courier_to_order(courier_idx, order_idx);
            if dist < best_dist {
                best_dist = dist;
                best = Some(courier_idx);
            }
        }

        routes[best.unwrap_or(0)].push(order_idx);
    }

    routes
}

/// Orders a courier's stops by repeatedly walking to the nearest
/// unvisited one. Ties keep the earlier entry of the input sequence.
pub(crate) fn sequence(cache: &DistanceCache, courier_idx: usize, orders: &[usize]) -> Vec<usize> {
    if orders.len() <= 1 {
        return orders.to_vec();
    }

    let mut route = Vec::with_capacity(orders.len());
    let mut remaining = orders.to_vec();
    let mut current: Option<usize> = None;

    while !remaining.is_empty() {
        let mut nearest = 0;
        let mut min_dist = f64::MAX;
        for (i, &candidate) in remaining.iter().enumerate() {
            let dist = match current {
                Some(at) => cache.order_to_order(at, candidate),
                None => cache.courier_to_order(courier_idx, candidate),
            };
            if dist < min_dist {
                min_dist = dist;
                nearest = i;
            }
        }
        let next = remaining.remove(nearest);
        route.push(next);
        current = Some(next);
    }

    route
}

/// Turns per-courier index routes into the wire response. Per-route
/// distances are rounded individually; the totals are rounded once
/// from the unrounded sums. Couriers with empty routes are omitted and
/// the result is sorted by courier id.
pub(crate) fn build_response(
    cache: &DistanceCache,
    orders: &[Order],
    couriers: &[Courier],
    routes: &[Vec<usize>],
) -> OptimizeResponse {
    let mut assignments = Vec::new();
    let mut total_after = 0.0;

    for (courier_idx, route) in routes.iter().enumerate() {
        if route.is_empty() {
            continue;
        }
        let distance = cache.route_distance(courier_idx, route);
        total_after += distance;
        assignments.push(Assignment {
            courier_id: couriers[courier_idx].id.clone(),
            route: route.iter().map(|&idx| orders[idx].id.clone()).collect(),
            total_distance: round2(distance),
        });
    }

    assignments.sort_by(|a, b| a.courier_id.cmp(&b.courier_id));

    OptimizeResponse {
        assignments,
        total_distance_before: round2(cache.baseline_km()),
        total_distance_after: round2(total_after),
    }
}
