//! Precomputed distance matrices shared by every solver path.
//!
//! Built once per solve from the request's orders and couriers, then
//! shared by read-only reference. All entries are kilometers.

use crate::geo::haversine_km;
use crate::{Courier, Order};

pub struct DistanceCache {
    courier_to_order: Vec<Vec<f64>>,
    order_to_order: Vec<Vec<f64>>,
    /// Per-courier order cap; -1 marks an uncapped courier.
    capacities: Vec<i64>,
    baseline_km: f64,
    order_count: usize,
    courier_count: usize,
}

impl DistanceCache {
    pub fn new(orders: &[Order], couriers: &[Courier]) -> Self {
        let order_count = orders.len();
        let courier_count = couriers.len();

        let courier_to_order = couriers
            .iter()
            .map(|courier| {
                orders
                    .iter()
                    .map(|order| haversine_km(courier.lat, courier.lng, order.lat, order.lng))
                    .collect()
            })
            .collect();

        let mut order_to_order = vec![vec![0.0; order_count]; order_count];
        for i in 0..order_count {
            for j in i + 1..order_count {
                let dist = haversine_km(orders[i].lat, orders[i].lng, orders[j].lat, orders[j].lng);
                order_to_order[i][j] = dist;
                order_to_order[j][i] = dist;
            }
        }

        let capacities = couriers
            .iter()
            .map(|courier| if courier.capacity <= 0 { -1 } else { courier.capacity })
            .collect();

        let baseline_km = compute_baseline(orders, couriers);

        Self {
            courier_to_order,
            order_to_order,
            capacities,
            baseline_km,
            order_count,
            courier_count,
        }
    }

    /// Distance of an open route: courier start to the first stop, then
    /// stop to stop. An empty route costs nothing.
    pub fn route_distance(&self, courier_idx: usize, route: &[usize]) -> f64 {
        let Some(&first) = route.first() else {
            return 0.0;
        };
        let mut total = self.courier_to_order[courier_idx][first];
        for window in route.windows(2) {
            total += self.order_to_order[window[0]][window[1]];
        }
        total
    }

    pub fn has_capacity(&self, courier_idx: usize, current_load: usize) -> bool {
        let capacity = self.capacities[courier_idx];
        capacity < 0 || (current_load as i64) < capacity
    }

    pub fn courier_to_order(&self, courier_idx: usize, order_idx: usize) -> f64 {
        self.courier_to_order[courier_idx][order_idx]
    }

    pub fn order_to_order(&self, from: usize, to: usize) -> f64 {
        self.order_to_order[from][to]
    }

    /// Deterministic non-optimized reference distance, reported to users
    /// as the "before" figure. Not a feasible solution.
    pub fn baseline_km(&self) -> f64 {
        self.baseline_km
    }

    pub fn order_count(&self) -> usize {
        self.order_count
    }

    pub fn courier_count(&self) -> usize {
        self.courier_count
    }
}

/// Partitions orders into contiguous input-order blocks of
/// `ceil(orders / couriers)` and charges each block to one courier:
/// courier start to each order, plus the legs between consecutive
/// orders of the same block.
fn compute_baseline(orders: &[Order], couriers: &[Courier]) -> f64 {
    if orders.is_empty() || couriers.is_empty() {
        return 0.0;
    }

    let block = ((orders.len() + couriers.len() - 1) / couriers.len()).max(1);
    let mut total = 0.0;

    for (i, order) in orders.iter().enumerate() {
        let courier_idx = (i / block).min(couriers.len() - 1);
        let courier = &couriers[courier_idx];
        total += haversine_km(courier.lat, courier.lng, order.lat, order.lng);

        if i > 0 && (i - 1) / block == i / block {
            let prev = &orders[i - 1];
            total += haversine_km(prev.lat, prev.lng, order.lat, order.lng);
        }
    }

    total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(id: &str, lat: f64, lng: f64) -> Order {
        Order {
            id: id.to_string(),
            lat,
            lng,
            item_count: 1,
            delivery_window: "9AM-12PM".to_string(),
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
        ];
        let couriers = vec![courier("S1", 0.0, 0.0, 2), courier("S2", 0.0, 1.0, 0)];
        (orders, couriers)
    }

    #[test]
    fn matrices_are_symmetric_with_zero_diagonal() {
        let (orders, couriers) = fixture();
        let cache = DistanceCache::new(&orders, &couriers);
        for i in 0..orders.len() {
            assert_eq!(cache.order_to_order(i, i), 0.0);
            for j in 0..orders.len() {
                assert!((cache.order_to_order(i, j) - cache.order_to_order(j, i)).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn route_distance_matches_leg_sum() {
        let (orders, couriers) = fixture();
        let cache = DistanceCache::new(&orders, &couriers);
        assert_eq!(cache.route_distance(0, &[]), 0.0);

        let expected = cache.courier_to_order(0, 0)
            + cache.order_to_order(0, 1)
            + cache.order_to_order(1, 2);
        let actual = cache.route_distance(0, &[0, 1, 2]);
        assert!((actual - expected).abs() < 1e-12);
    }

    #[test]
    fn capacity_checks_respect_uncapped_sentinel() {
        let (orders, couriers) = fixture();
        let cache = DistanceCache::new(&orders, &couriers);
        assert!(cache.has_capacity(0, 0));
        assert!(cache.has_capacity(0, 1));
        assert!(!cache.has_capacity(0, 2));
        // Courier with capacity 0 is uncapped.
        assert!(cache.has_capacity(1, 10_000));
    }

    #[test]
    fn baseline_charges_blocks_in_input_order() {
        let (orders, couriers) = fixture();
        let cache = DistanceCache::new(&orders, &couriers);

        // Block size ceil(3/2) = 2: O1,O2 on S1 and O3 on S2.
        let expected = haversine_km(0.0, 0.0, 0.0, 0.1)
            + haversine_km(0.0, 0.0, 0.0, 0.2)
            + haversine_km(0.0, 0.1, 0.0, 0.2)
            + haversine_km(0.0, 1.0, 0.0, 0.9);
        assert!((cache.baseline_km() - expected).abs() < 1e-9);
    }

    #[test]
    fn baseline_is_zero_for_empty_input() {
        let cache = DistanceCache::new(&[], &[courier("S1", 0.0, 0.0, 1)]);
        assert_eq!(cache.baseline_km(), 0.0);
        assert_eq!(cache.order_count(), 0);
    }
}
