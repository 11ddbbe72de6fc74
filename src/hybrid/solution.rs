//! Solver-internal solution state and the GRASP construction plus ALNS
//! destroy/repair moves applied to it. Mutated only by the worker that
//! owns it; the published best is always a value copy.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use std::cmp::Ordering;

use super::NormalizedOptions;
use crate::cache::DistanceCache;
use crate::{round2, Assignment, Courier, Order};

#[derive(Clone)]
pub(crate) struct Solution {
    /// Per-courier order-index routes.
    pub(crate) routes: Vec<Vec<usize>>,
    pub(crate) route_distances: Vec<f64>,
    pub(crate) total_distance: f64,
    pub(crate) temperature: f64,
}

impl Solution {
    fn new(courier_count: usize) -> Self {
        Self {
            routes: vec![Vec::new(); courier_count],
            route_distances: vec![0.0; courier_count],
            total_distance: 0.0,
            temperature: 1.0,
        }
    }

    pub(crate) fn recompute_totals(&mut self, cache: &DistanceCache) {
        let mut total = 0.0;
        for courier_idx in 0..self.routes.len() {
            let distance = cache.route_distance(courier_idx, &self.routes[courier_idx]);
            self.route_distances[courier_idx] = distance;
            total += distance;
        }
        self.total_distance = total;
    }

    pub(crate) fn order_count(&self) -> usize {
        self.routes.iter().map(|route| route.len()).sum()
    }

    pub(crate) fn to_assignments(
        &self,
        orders: &[Order],
        couriers: &[Courier],
        cache: &DistanceCache,
    ) -> Vec<Assignment> {
        let mut assignments = Vec::new();
        for (courier_idx, route) in self.routes.iter().enumerate() {
            if route.is_empty() {
                continue;
            }
            assignments.push(Assignment {
                courier_id: couriers[courier_idx].id.clone(),
                route: route.iter().map(|&idx| orders[idx].id.clone()).collect(),
                total_distance: round2(cache.route_distance(courier_idx, route)),
            });
        }
        assignments
    }

    /// Removes up to `count` orders at uniformly random (courier,
    /// position) picks. Bounded attempts keep the loop finite when most
    /// routes are empty.
    fn destroy(&mut self, count: usize, rng: &mut StdRng) -> Vec<usize> {
        if count == 0 {
            return Vec::new();
        }

        let mut removed = Vec::with_capacity(count);
        let max_attempts = count * self.routes.len() * 2;
        let mut attempts = 0;

        while removed.len() < count {
            if attempts > max_attempts {
                break;
            }
            attempts += 1;
            let courier_idx = rng.gen_range(0..self.routes.len());
            if self.routes[courier_idx].is_empty() {
                continue;
            }
            let position = rng.gen_range(0..self.routes[courier_idx].len());
            removed.push(self.routes[courier_idx].remove(position));
        }

        removed
    }

    /// Randomized cheapest insertion: every removed order goes to one of
    /// the `rcl` cheapest feasible (courier, position) slots. With no
    /// feasible slot at all the order is appended to a random courier
    /// rather than dropped.
    fn repair(
        &mut self,
        removed: &[usize],
        cache: &DistanceCache,
        rcl_size: usize,
        rng: &mut StdRng,
    ) {
        for &order_idx in removed {
            let mut options: Vec<(usize, usize, f64)> = Vec::new();

            for courier_idx in 0..self.routes.len() {
                let route = &self.routes[courier_idx];
                if !cache.has_capacity(courier_idx, route.len()) {
                    continue;
                }
                if route.is_empty() {
                    options.push((courier_idx, 0, cache.courier_to_order(courier_idx, order_idx)));
                    continue;
                }
                for position in 0..=route.len() {
                    let delta = insertion_delta(cache, courier_idx, route, order_idx, position);
                    options.push((courier_idx, position, delta));
                }
            }

            if options.is_empty() {
                let fallback = rng.gen_range(0..self.routes.len());
                self.routes[fallback].push(order_idx);
                continue;
            }

            options.sort_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(Ordering::Equal));
            let rcl = rcl_size.max(1).min(options.len());
            let (courier_idx, position, _) = options[rng.gen_range(0..rcl)];

            let route = &mut self.routes[courier_idx];
            if position >= route.len() {
                route.push(order_idx);
            } else {
                route.insert(position, order_idx);
            }
        }
    }
}

/// Cost change of inserting `order_idx` at `position`. Routes are open
/// ended, so an insertion at the tail adds no trailing leg.
fn insertion_delta(
    cache: &DistanceCache,
    courier_idx: usize,
    route: &[usize],
    order_idx: usize,
    position: usize,
) -> f64 {
    let prev_to_order = if position == 0 {
        cache.courier_to_order(courier_idx, order_idx)
    } else {
        cache.order_to_order(route[position - 1], order_idx)
    };

    let order_to_next = if position == route.len() {
        0.0
    } else {
        cache.order_to_order(order_idx, route[position])
    };

    let previous_to_next = if route.is_empty() || position == route.len() {
        0.0
    } else if position == 0 {
        cache.courier_to_order(courier_idx, route[0])
    } else {
        cache.order_to_order(route[position - 1], route[position])
    };

    prev_to_order + order_to_next - previous_to_next
}

/// GRASP construction: a shuffled order permutation assigned through a
/// restricted candidate list of the nearest capacitated couriers, then
/// each route resequenced by noise-perturbed nearest neighbor.
pub(crate) fn build_initial_solution(
    cache: &DistanceCache,
    opts: &NormalizedOptions,
    rng: &mut StdRng,
) -> Solution {
    let mut result = Solution::new(cache.courier_count());

    let mut order_indices: Vec<usize> = (0..cache.order_count()).collect();
    order_indices.shuffle(rng);

    let rcl_size = opts.rcl_size.max(1);
    let mut loads = vec![0usize; cache.courier_count()];

    for &order_idx in &order_indices {
        let mut candidates: Vec<(usize, f64)> = (0..cache.courier_count())
            .map(|courier_idx| (courier_idx, cache.courier_to_order(courier_idx, order_idx)))
            .collect();
        candidates.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

        let rcl_limit = rcl_size.min(candidates.len());
        let capacitated_in_rcl: Vec<usize> = candidates[..rcl_limit]
            .iter()
            .filter(|&&(courier_idx, _)| cache.has_capacity(courier_idx, loads[courier_idx]))
            .map(|&(courier_idx, _)| courier_idx)
            .collect();

        let selected = if let Some(&pick) = capacitated_in_rcl.choose(rng) {
            pick
        } else if let Some(&(courier_idx, _)) = candidates
            .iter()
            .find(|&&(courier_idx, _)| cache.has_capacity(courier_idx, loads[courier_idx]))
        {
            courier_idx
        } else {
            candidates[0].0
        };

        result.routes[selected].push(order_idx);
        loads[selected] += 1;
    }

    for courier_idx in 0..result.routes.len() {
        if result.routes[courier_idx].len() > 1 {
            result.routes[courier_idx] =
                randomized_nearest_neighbor(cache, courier_idx, &result.routes[courier_idx], rng);
        }
        result.route_distances[courier_idx] =
            cache.route_distance(courier_idx, &result.routes[courier_idx]);
    }

    result.total_distance = result.route_distances.iter().sum();
    result.temperature = (result.total_distance * 0.05).max(1.0);

    result
}

/// Nearest-neighbor ordering with each candidate distance perturbed by
/// up to ten percent, so repeated restarts explore different sequences.
fn randomized_nearest_neighbor(
    cache: &DistanceCache,
    courier_idx: usize,
    orders: &[usize],
    rng: &mut StdRng,
) -> Vec<usize> {
    let mut remaining = orders.to_vec();
    let mut route = Vec::with_capacity(orders.len());
    let mut current: Option<usize> = None;

    while !remaining.is_empty() {
        let mut candidates: Vec<(usize, f64)> = remaining
            .iter()
            .map(|&order_idx| {
                let dist = match current {
                    Some(at) => cache.order_to_order(at, order_idx),
                    None => cache.courier_to_order(courier_idx, order_idx),
                };
                (order_idx, dist * (1.0 + rng.gen::<f64>() * 0.1))
            })
            .collect();
        candidates.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

        let pick = candidates[0].0;
        route.push(pick);
        current = Some(pick);
        if let Some(position) = remaining.iter().position(|&idx| idx == pick) {
            remaining.remove(position);
        }
    }

    route
}

/// ALNS inner loop: destroy, repair, then simulated-annealing
/// acceptance. Returns the walk's final solution and how many strict
/// improvements were accepted along the way.
pub(crate) fn run_local_search(
    base: &Solution,
    cache: &DistanceCache,
    opts: &NormalizedOptions,
    rng: &mut StdRng,
) -> (Solution, i64) {
    let mut current = base.clone();
    let mut temperature = current.temperature;
    if temperature <= 0.0 {
        temperature = (current.total_distance * 0.05).max(1.0);
    }

    let mut improvements = 0i64;

    for _ in 0..opts.local_search {
        let mut neighbor = current.clone();
        let order_count = neighbor.order_count();
        let remove_count = ((opts.destroy_rate * order_count as f64).ceil() as usize)
            .max(1)
            .min(order_count);

        let removed = neighbor.destroy(remove_count, rng);
        neighbor.repair(&removed, cache, opts.rcl_size, rng);
        neighbor.recompute_totals(cache);

        let delta = neighbor.total_distance - current.total_distance;
        let accepted = if delta < 0.0 {
            improvements += 1;
            current = neighbor;
            true
        } else {
            let threshold = (-delta / temperature.max(1e-6)).exp();
            if rng.gen::<f64>() < threshold {
                current = neighbor;
                true
            } else {
                false
            }
        };

        temperature *= if accepted { 0.98 } else { 0.995 };
        if temperature < 1e-3 {
            temperature = 1e-3;
        }
        current.temperature = temperature;
    }

    (current, improvements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn order(id: &str, lat: f64, lng: f64) -> Order {
        Order {
            id: id.to_string(),
            lat,
            lng,
            item_count: 1,
            delivery_window: "ASAP".to_string(),
        }
    }

    fn courier(id: &str, lat: f64, lng: f64, capacity: i64) -> Courier {
        Courier {
            id: id.to_string(),
            lat,
            lng,
            capacity,
        }
    }

    fn fixture() -> (Vec<Order>, Vec<Courier>) {
        let orders = vec![
            order("O1", 0.0, 0.1),
            order("O2", 0.0, 0.2),
            order("O3", 0.0, 0.9),
            order("O4", 0.0, 0.95),
            order("O5", 0.01, 0.5),
        ];
        let couriers = vec![courier("S1", 0.0, 0.0, 3), courier("S2", 0.0, 1.0, 3)];
        (orders, couriers)
    }

    fn opts() -> NormalizedOptions {
        crate::hybrid::HybridSolveOptions {
            iterations: 10,
            workers: 1,
            random_seed: 7,
            ..Default::default()
        }
        .normalize()
    }

    fn assert_covers_all(solution: &Solution, order_count: usize) {
        let mut seen = vec![false; order_count];
        for route in &solution.routes {
            for &idx in route {
                assert!(!seen[idx], "order {} duplicated", idx);
                seen[idx] = true;
            }
        }
        assert!(seen.iter().all(|&v| v), "some order lost");
    }

    #[test]
    fn initial_solution_covers_all_orders_within_capacity() {
        let (orders, couriers) = fixture();
        let cache = DistanceCache::new(&orders, &couriers);
        let mut rng = StdRng::seed_from_u64(42);

        let solution = build_initial_solution(&cache, &opts(), &mut rng);
        assert_covers_all(&solution, orders.len());
        for route in &solution.routes {
            assert!(route.len() <= 3);
        }
        assert!(solution.temperature >= 1.0);
        let recomputed: f64 = (0..couriers.len())
            .map(|c| cache.route_distance(c, &solution.routes[c]))
            .sum();
        assert!((solution.total_distance - recomputed).abs() < 1e-9);
    }

    #[test]
    fn destroy_then_repair_preserves_coverage() {
        let (orders, couriers) = fixture();
        let cache = DistanceCache::new(&orders, &couriers);
        let mut rng = StdRng::seed_from_u64(3);

        let mut solution = build_initial_solution(&cache, &opts(), &mut rng);
        let removed = solution.destroy(2, &mut rng);
        assert_eq!(removed.len(), 2);
        assert_eq!(solution.order_count(), orders.len() - 2);

        solution.repair(&removed, &cache, 3, &mut rng);
        assert_covers_all(&solution, orders.len());
    }

    #[test]
    fn insertion_delta_matches_recomputed_route() {
        let (orders, couriers) = fixture();
        let cache = DistanceCache::new(&orders, &couriers);

        let route = vec![0, 1];
        let before = cache.route_distance(0, &route);
        for position in 0..=route.len() {
            let delta = insertion_delta(&cache, 0, &route, 4, position);
            let mut inserted = route.clone();
            inserted.insert(position, 4);
            let after = cache.route_distance(0, &inserted);
            // Open-route convention: the trailing leg after the last stop
            // is free, so the delta equals the true cost change.
            assert!(
                (after - before - delta).abs() < 1e-9,
                "position {}: {} vs {}",
                position,
                after - before,
                delta
            );
        }
    }

    #[test]
    fn local_search_keeps_totals_consistent() {
        let (orders, couriers) = fixture();
        let cache = DistanceCache::new(&orders, &couriers);
        let mut rng = StdRng::seed_from_u64(11);

        let initial = build_initial_solution(&cache, &opts(), &mut rng);
        let (improved, improvements) = run_local_search(&initial, &cache, &opts(), &mut rng);

        assert!(improvements >= 0);
        assert_covers_all(&improved, orders.len());
        let recomputed: f64 = (0..couriers.len())
            .map(|c| cache.route_distance(c, &improved.routes[c]))
            .sum();
        assert!((improved.total_distance - recomputed).abs() < 1e-9);
        assert!(improved.temperature >= 1e-3);
    }

    #[test]
    fn repair_falls_back_when_nothing_is_feasible() {
        let orders = vec![order("O1", 0.0, 0.1), order("O2", 0.0, 0.2)];
        let couriers = vec![courier("S1", 0.0, 0.0, 1)];
        let cache = DistanceCache::new(&orders, &couriers);
        let mut rng = StdRng::seed_from_u64(5);

        let mut solution = Solution::new(1);
        solution.routes[0] = vec![0];
        // The only courier is full, so the repair appends anyway.
        solution.repair(&[1], &cache, 3, &mut rng);
        assert_eq!(solution.order_count(), 2);
    }
}
