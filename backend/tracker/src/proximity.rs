//! # Proximity alerts
//!
//! A lost pet is "nearby" when its most recent report lies within the alert
//! radius of the viewer. Pets that are not lost, and pets nobody has reported
//! yet, never alert.
//!
//! [`AlertBook`] is the per-session memory of what the viewer already
//! dismissed or was already notified about.
use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::{
    geo::Coordinates,
    models::{Pet, PetId, PetStatus, Sighting},
};

pub const DEFAULT_ALERT_RADIUS_KM: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProximityMatch {
    pub pet: Pet,
    pub latest: Sighting,
    pub distance_km: f64,
}

/// Newest report per pet by creation time.
pub fn latest_reports<'a, I>(reports: I) -> HashMap<&'a PetId, &'a Sighting>
where
    I: IntoIterator<Item = &'a Sighting>,
{
    let mut latest: HashMap<&PetId, &Sighting> = HashMap::new();

    for report in reports {
        latest
            .entry(&report.pet_id)
            .and_modify(|current| {
                if report.created_at > current.created_at {
                    *current = report;
                }
            })
            .or_insert(report);
    }

    latest
}

pub fn nearby_lost(
    viewer: &Coordinates,
    pets: &[Pet],
    reports: &[Sighting],
    radius_km: f64,
) -> Vec<ProximityMatch> {
    let latest = latest_reports(reports);

    pets.iter()
        .filter(|pet| pet.status == PetStatus::Lost)
        .filter_map(|pet| {
            let report = latest.get(&pet.id)?;
            let distance_km = viewer.distance_km(&report.location);

            (distance_km <= radius_km).then(|| ProximityMatch {
                pet: pet.clone(),
                latest: (*report).clone(),
                distance_km,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct AlertBook {
    dismissed: HashSet<PetId>,
    notified: HashSet<PetId>,
}

impl AlertBook {
    pub fn dismiss(&mut self, pet_id: PetId) {
        self.dismissed.insert(pet_id);
    }

    pub fn is_dismissed(&self, pet_id: &PetId) -> bool {
        self.dismissed.contains(pet_id)
    }

    pub fn visible(&self, matches: Vec<ProximityMatch>) -> Vec<ProximityMatch> {
        matches
            .into_iter()
            .filter(|m| !self.is_dismissed(&m.pet.id))
            .collect()
    }

    /// Visible matches not notified before in this session. Marks them notified.
    pub fn take_unnotified<'a>(
        &mut self,
        matches: &'a [ProximityMatch],
    ) -> Vec<&'a ProximityMatch> {
        matches
            .iter()
            .filter(|m| !self.dismissed.contains(&m.pet.id))
            .filter(|m| self.notified.insert(m.pet.id.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::*;
    use crate::models::{SightingId, Species};

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn viewer() -> Coordinates {
        Coordinates::new(-37.4697, -72.3537).unwrap()
    }

    fn pet(id: &str, status: PetStatus) -> Pet {
        Pet {
            id: PetId::from(id),
            name: Some(id.to_uppercase()),
            species: Species::Dog,
            breed_id: None,
            breed_custom: None,
            color_id: None,
            status,
            lost_at: None,
            lost_latitude: None,
            lost_longitude: None,
            description: None,
            created_at: t(0),
        }
    }

    fn report(pet: &str, lat: f64, lng: f64, at: DateTime<Utc>) -> Sighting {
        Sighting {
            id: SightingId::new(format!("{pet}-{}", at.timestamp())),
            pet_id: PetId::from(pet),
            location: Coordinates::new(lat, lng).unwrap(),
            notes: None,
            reporter: None,
            created_at: at,
            reported_at: None,
            verification_count: 0,
            verified: false,
        }
    }

    #[test]
    fn test_close_lost_pet_alerts() {
        let pets = vec![pet("rex", PetStatus::Lost)];
        let reports = vec![report("rex", -37.4700, -72.3530, t(1))];

        let found = nearby_lost(&viewer(), &pets, &reports, DEFAULT_ALERT_RADIUS_KM);

        assert_eq!(found.len(), 1);
        assert!(found[0].distance_km < 0.1);
    }

    #[test]
    fn test_far_lost_pet_is_excluded() {
        let pets = vec![pet("rex", PetStatus::Lost)];
        // ~20 km north
        let reports = vec![report("rex", -37.2898, -72.3537, t(1))];

        assert!(nearby_lost(&viewer(), &pets, &reports, DEFAULT_ALERT_RADIUS_KM).is_empty());
    }

    #[test]
    fn test_only_lost_pets_alert() {
        let pets = vec![
            pet("found", PetStatus::Found),
            pet("sighted", PetStatus::Sighted),
            pet("returned", PetStatus::Returned),
        ];
        let reports = vec![
            report("found", -37.4697, -72.3537, t(1)),
            report("sighted", -37.4697, -72.3537, t(1)),
            report("returned", -37.4697, -72.3537, t(1)),
        ];

        assert!(nearby_lost(&viewer(), &pets, &reports, 1000.0).is_empty());
    }

    #[test]
    fn test_unreported_pet_never_alerts() {
        let pets = vec![pet("ghost", PetStatus::Lost)];

        assert!(nearby_lost(&viewer(), &pets, &[], 20_000.0).is_empty());
    }

    #[test]
    fn test_uses_latest_report() {
        let pets = vec![pet("rex", PetStatus::Lost)];
        let reports = vec![
            report("rex", -37.2898, -72.3537, t(30)),
            report("rex", -37.4700, -72.3530, t(10)),
        ];

        // The newest report is the far one, so the pet moved out of range.
        assert!(nearby_lost(&viewer(), &pets, &reports, DEFAULT_ALERT_RADIUS_KM).is_empty());

        let latest = latest_reports(&reports);
        assert_eq!(latest[&PetId::from("rex")].created_at, t(30));
    }

    #[test]
    fn test_radius_is_inclusive() {
        let pets = vec![pet("rex", PetStatus::Lost)];
        let reports = vec![report("rex", -37.4700, -72.3530, t(1))];
        let exact = viewer().distance_km(&reports[0].location);

        assert_eq!(nearby_lost(&viewer(), &pets, &reports, exact).len(), 1);
    }

    #[test]
    fn test_dismissed_alert_stays_hidden() {
        let pets = vec![pet("rex", PetStatus::Lost), pet("luna", PetStatus::Lost)];
        let reports = vec![
            report("rex", -37.4700, -72.3530, t(1)),
            report("luna", -37.4699, -72.3533, t(2)),
        ];
        let mut book = AlertBook::default();
        book.dismiss(PetId::from("rex"));

        // refreshed data set, same session
        for _ in 0..2 {
            let matches = nearby_lost(&viewer(), &pets, &reports, DEFAULT_ALERT_RADIUS_KM);
            let visible = book.visible(matches);
            assert_eq!(visible.len(), 1);
            assert_eq!(visible[0].pet.id, PetId::from("luna"));
        }
    }

    #[test]
    fn test_notifies_each_pet_once() {
        let pets = vec![pet("rex", PetStatus::Lost)];
        let reports = vec![report("rex", -37.4700, -72.3530, t(1))];
        let matches = nearby_lost(&viewer(), &pets, &reports, DEFAULT_ALERT_RADIUS_KM);
        let mut book = AlertBook::default();

        assert_eq!(book.take_unnotified(&matches).len(), 1);
        assert!(book.take_unnotified(&matches).is_empty());
    }
}
