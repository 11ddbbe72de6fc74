//! Dashboard analytics derived from a finished set of assignments:
//! per-courier workload and timing, order-distribution insights, and
//! system-level totals with an overall optimization score.

use chrono::{Duration as ChronoDuration, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::geo::haversine_km;
use crate::routing::{self, RoutePoint};
use crate::{round1, round2, Assignment, Courier, Order, AVERAGE_SPEED_KMPH};

/// Handling time budgeted per delivery stop, in minutes.
const SERVICE_MINUTES_PER_ORDER: f64 = 10.0;
/// Prep lead before a courier can depart, in minutes.
const PREP_MINUTES: i64 = 15;
const FUEL_COST_PER_KM: f64 = 0.15;
const CO2_KG_PER_KM: f64 = 0.2;
/// Assumed savings of optimized vs unoptimized routing.
const CO2_SAVINGS_RATE: f64 = 0.3;
/// Rough size of one degree of latitude or longitude.
const KM_PER_DEGREE: f64 = 111.0;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CourierAnalytics {
    #[serde(rename = "shopperId")]
    pub courier_id: String,
    pub orders_assigned: usize,
    /// Kilometers.
    pub total_distance: f64,
    /// Minutes.
    pub total_duration: f64,
    /// Percent of capacity in use; zero for uncapped couriers.
    pub capacity_utilization: f64,
    pub average_order_distance: f64,
    pub estimated_start_time: String,
    pub estimated_end_time: String,
    /// Orders per hour.
    pub efficiency: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OrderAnalyticsSummary {
    pub total_orders: usize,
    pub average_item_count: f64,
    pub total_items: i64,
    /// Orders per square kilometer of the bounding box.
    pub order_density: f64,
    /// Mean pairwise inter-order distance.
    pub average_distance: f64,
    pub unassigned_orders: usize,
    pub time_window_breakdown: HashMap<String, i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SystemAnalytics {
    #[serde(rename = "totalShoppers")]
    pub total_couriers: usize,
    #[serde(rename = "activeShoppers")]
    pub active_couriers: usize,
    pub total_orders: usize,
    pub assigned_orders: usize,
    pub total_distance: f64,
    pub total_duration: f64,
    pub average_efficiency: f64,
    pub optimization_score: f64,
    pub estimated_fuel_cost: f64,
    #[serde(rename = "co2Saved")]
    pub co2_saved: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RouteGeometry {
    #[serde(rename = "shopperId")]
    pub courier_id: String,
    /// `[lat, lng]` pairs along the route.
    pub points: Vec<[f64; 2]>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsResponse {
    pub system: SystemAnalytics,
    #[serde(rename = "shoppers")]
    pub couriers: Vec<CourierAnalytics>,
    pub orders: OrderAnalyticsSummary,
    pub route_geometries: Vec<RouteGeometry>,
}

/// Computes the full analytics bundle for a finished solve.
///
/// With `use_real_routes` the route geometries come from the road
/// provider, one call per consecutive stop pair; otherwise (and on any
/// provider failure) straight lines are used.
pub async fn from_assignments(
    orders: &[Order],
    couriers: &[Courier],
    assignments: &[Assignment],
    use_real_routes: bool,
    api_key: Option<&str>,
) -> AnalyticsResponse {
    let courier_analytics = courier_analytics(couriers, assignments);
    let order_summary = order_summary(orders, assignments);
    let system = system_analytics(orders, couriers, assignments, &courier_analytics);
    let route_geometries =
        route_geometries(orders, couriers, assignments, use_real_routes, api_key).await;

    AnalyticsResponse {
        system,
        couriers: courier_analytics,
        orders: order_summary,
        route_geometries,
    }
}

fn courier_analytics(couriers: &[Courier], assignments: &[Assignment]) -> Vec<CourierAnalytics> {
    let courier_by_id: HashMap<&str, &Courier> =
        couriers.iter().map(|courier| (courier.id.as_str(), courier)).collect();
    let now = Local::now();

    let mut analytics: Vec<CourierAnalytics> = assignments
        .iter()
        .map(|assignment| {
            let orders_assigned = assignment.route.len();
            let total_distance = assignment.total_distance;
            let total_duration = total_distance / AVERAGE_SPEED_KMPH * 60.0
                + orders_assigned as f64 * SERVICE_MINUTES_PER_ORDER;

            let capacity = courier_by_id
                .get(assignment.courier_id.as_str())
                .map(|courier| courier.capacity)
                .unwrap_or(0);
            let capacity_utilization = if capacity > 0 {
                orders_assigned as f64 / capacity as f64 * 100.0
            } else {
                0.0
            };

            let average_order_distance = if orders_assigned > 0 {
                total_distance / orders_assigned as f64
            } else {
                0.0
            };

            let efficiency = if total_duration > 0.0 {
                orders_assigned as f64 / total_duration * 60.0
            } else {
                0.0
            };

            let start = now + ChronoDuration::minutes(PREP_MINUTES);
            let end = start + ChronoDuration::minutes(total_duration as i64);

            CourierAnalytics {
                courier_id: assignment.courier_id.clone(),
                orders_assigned,
                total_distance,
                total_duration: round1(total_duration),
                capacity_utilization: round1(capacity_utilization),
                average_order_distance: round2(average_order_distance),
                estimated_start_time: start.format("%-I:%M %p").to_string(),
                estimated_end_time: end.format("%-I:%M %p").to_string(),
                efficiency: round2(efficiency),
            }
        })
        .collect();

    analytics.sort_by(|a, b| a.courier_id.cmp(&b.courier_id));
    analytics
}

fn order_summary(orders: &[Order], assignments: &[Assignment]) -> OrderAnalyticsSummary {
    let mut total_items = 0i64;
    let mut time_window_breakdown: HashMap<String, i64> = HashMap::new();
    for order in orders {
        total_items += order.item_count;
        *time_window_breakdown.entry(order.delivery_window.clone()).or_insert(0) += 1;
    }

    let average_item_count = if orders.is_empty() {
        0.0
    } else {
        total_items as f64 / orders.len() as f64
    };

    let mut average_distance = 0.0;
    if orders.len() > 1 {
        let mut total = 0.0;
        let mut pairs = 0usize;
        for i in 0..orders.len() - 1 {
            for j in i + 1..orders.len() {
                total += haversine_km(orders[i].lat, orders[i].lng, orders[j].lat, orders[j].lng);
                pairs += 1;
            }
        }
        average_distance = total / pairs as f64;
    }

    let assigned: std::collections::HashSet<&str> = assignments
        .iter()
        .flat_map(|assignment| assignment.route.iter().map(String::as_str))
        .collect();

    OrderAnalyticsSummary {
        total_orders: orders.len(),
        average_item_count: round1(average_item_count),
        total_items,
        order_density: order_density(orders),
        average_distance: round2(average_distance),
        unassigned_orders: orders.len() - assigned.len(),
        time_window_breakdown,
    }
}

fn system_analytics(
    orders: &[Order],
    couriers: &[Courier],
    assignments: &[Assignment],
    courier_analytics: &[CourierAnalytics],
) -> SystemAnalytics {
    let mut total_distance = 0.0;
    let mut total_duration = 0.0;
    let mut total_efficiency = 0.0;
    let mut assigned_orders = 0usize;

    for entry in courier_analytics {
        total_distance += entry.total_distance;
        total_duration += entry.total_duration;
        total_efficiency += entry.efficiency;
        assigned_orders += entry.orders_assigned;
    }

    let average_efficiency = if courier_analytics.is_empty() {
        0.0
    } else {
        total_efficiency / courier_analytics.len() as f64
    };

    SystemAnalytics {
        total_couriers: couriers.len(),
        active_couriers: assignments.len(),
        total_orders: orders.len(),
        assigned_orders,
        total_distance: round2(total_distance),
        total_duration: round1(total_duration),
        average_efficiency: round2(average_efficiency),
        optimization_score: round1(optimization_score(courier_analytics)),
        estimated_fuel_cost: round2(total_distance * FUEL_COST_PER_KM),
        co2_saved: round2(total_distance * CO2_SAVINGS_RATE * CO2_KG_PER_KM),
    }
}

/// Blend of how full the active couriers are and how evenly the orders
/// are spread across them, on a 0 to 100 scale.
fn optimization_score(courier_analytics: &[CourierAnalytics]) -> f64 {
    if courier_analytics.is_empty() {
        return 0.0;
    }

    let average_utilization = courier_analytics
        .iter()
        .map(|entry| entry.capacity_utilization)
        .sum::<f64>()
        / courier_analytics.len() as f64;
    let capacity_score = average_utilization.min(100.0);

    let mut distribution_score = 100.0;
    if courier_analytics.len() > 1 {
        let mean = courier_analytics
            .iter()
            .map(|entry| entry.orders_assigned as f64)
            .sum::<f64>()
            / courier_analytics.len() as f64;
        let variance = courier_analytics
            .iter()
            .map(|entry| {
                let diff = entry.orders_assigned as f64 - mean;
                diff * diff
            })
            .sum::<f64>()
            / courier_analytics.len() as f64;
        distribution_score = (100.0 - variance * 10.0).max(0.0);
    }

    (capacity_score * 0.6 + distribution_score * 0.4).min(100.0)
}

async fn route_geometries(
    orders: &[Order],
    couriers: &[Courier],
    assignments: &[Assignment],
    use_real_routes: bool,
    api_key: Option<&str>,
) -> Vec<RouteGeometry> {
    let order_by_id: HashMap<&str, &Order> =
        orders.iter().map(|order| (order.id.as_str(), order)).collect();
    let courier_by_id: HashMap<&str, &Courier> =
        couriers.iter().map(|courier| (courier.id.as_str(), courier)).collect();

    let mut geometries = Vec::with_capacity(assignments.len());

    for assignment in assignments {
        let Some(courier) = courier_by_id.get(assignment.courier_id.as_str()) else {
            continue;
        };

        let mut waypoints = vec![RoutePoint {
            lat: courier.lat,
            lng: courier.lng,
        }];
        for order_id in &assignment.route {
            if let Some(order) = order_by_id.get(order_id.as_str()) {
                waypoints.push(RoutePoint {
                    lat: order.lat,
                    lng: order.lng,
                });
            }
        }

        let points = if use_real_routes && waypoints.len() > 1 {
            let pairs: Vec<(RoutePoint, RoutePoint)> = waypoints
                .windows(2)
                .map(|pair| (pair[0], pair[1]))
                .collect();
            let segments = routing::batch_get_routes(&pairs, api_key).await;
            segments
                .iter()
                .flat_map(|segment| segment.geometry.iter())
                .map(|point| [point.lat, point.lng])
                .collect()
        } else {
            waypoints.iter().map(|point| [point.lat, point.lng]).collect()
        };

        geometries.push(RouteGeometry {
            courier_id: assignment.courier_id.clone(),
            points,
        });
    }

    geometries
}

fn order_density(orders: &[Order]) -> f64 {
    if orders.len() < 2 {
        return 0.0;
    }

    let mut min_lat = orders[0].lat;
    let mut max_lat = orders[0].lat;
    let mut min_lng = orders[0].lng;
    let mut max_lng = orders[0].lng;
    for order in orders {
        min_lat = min_lat.min(order.lat);
        max_lat = max_lat.max(order.lat);
        min_lng = min_lng.min(order.lng);
        max_lng = max_lng.max(order.lng);
    }

    let area = (max_lat - min_lat) * KM_PER_DEGREE * ((max_lng - min_lng) * KM_PER_DEGREE);
    if area == 0.0 {
        return 0.0;
    }

    round2(orders.len() as f64 / area)
}
