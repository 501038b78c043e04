//! # Routes
//!
//! Groups reports by pet and orders them oldest first so a map can draw the
//! path a pet has travelled.
use std::collections::HashMap;

use serde::Serialize;

use crate::{
    geo::Coordinates,
    models::{PetId, Sighting},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Route {
    pub reports: Vec<Sighting>,
}

impl Route {
    /// A single point cannot form a visible path.
    pub fn is_drawable(&self) -> bool {
        self.reports.len() >= 2
    }

    pub fn path(&self) -> Vec<Coordinates> {
        self.reports.iter().map(|report| report.location).collect()
    }
}

pub fn build_routes<I>(reports: I) -> HashMap<PetId, Route>
where
    I: IntoIterator<Item = Sighting>,
{
    let mut routes: HashMap<PetId, Route> = HashMap::new();

    for report in reports {
        routes
            .entry(report.pet_id.clone())
            .or_default()
            .reports
            .push(report);
    }

    for route in routes.values_mut() {
        // stable: equal timestamps keep arrival order
        route.reports.sort_by_key(|report| report.created_at);
    }

    routes
}
