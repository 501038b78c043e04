//! # Pet search
//!
//! Filtering and ordering for the pet list. Text matching runs on normalized
//! strings so "Señor_Bigotes!" and "señor bigotes" are the same query.
use std::{cmp::Ordering, collections::HashMap, sync::LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;

use crate::{
    models::{Pet, PetId, PetStatus, Sighting, Species},
    proximity::latest_reports,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Recent,
    Name,
    Status,
    Species,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PetQuery {
    #[serde(default, rename = "q")]
    pub text: Option<String>,
    #[serde(default)]
    pub species: Option<Species>,
    #[serde(default)]
    pub status: Option<PetStatus>,
    #[serde(default)]
    pub breed_id: Option<String>,
    #[serde(default)]
    pub sort: SortKey,
    #[serde(default)]
    pub order: SortOrder,
}

pub struct Normalizer {
    underscore: Regex,
    disallowed: Regex,
    spaces: Regex,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self {
            underscore: Regex::new(r"_").expect("static pattern"),
            disallowed: Regex::new(r"[^\p{L}\p{N}\- ]").expect("static pattern"),
            spaces: Regex::new(r" +").expect("static pattern"),
        }
    }

    pub fn normalize(&self, input: &str) -> String {
        let s = self.underscore.replace_all(input, " ");
        let s = self.disallowed.replace_all(&s, "");

        self.spaces.replace_all(s.trim(), " ").to_lowercase()
    }
}

static NORMALIZER: LazyLock<Normalizer> = LazyLock::new(Normalizer::new);

pub fn normalize(input: &str) -> String {
    NORMALIZER.normalize(input)
}

pub fn filter_and_sort(pets: &[Pet], reports: &[Sighting], query: &PetQuery) -> Vec<Pet> {
    let normalizer = &*NORMALIZER;
    let needle = query
        .text
        .as_deref()
        .map(|text| normalizer.normalize(text))
        .filter(|text| !text.is_empty());

    let matches_text = |pet: &Pet| match &needle {
        None => true,
        Some(needle) => [&pet.name, &pet.description, &pet.breed_custom]
            .into_iter()
            .flatten()
            .any(|field| normalizer.normalize(field).contains(needle.as_str())),
    };

    let mut filtered: Vec<Pet> = pets
        .iter()
        .filter(|pet| query.species.is_none_or_eq(pet.species))
        .filter(|pet| query.status.is_none_or_eq(pet.status))
        .filter(|pet| match &query.breed_id {
            None => true,
            Some(breed) => pet.breed_id.as_ref() == Some(breed),
        })
        .filter(|pet| matches_text(*pet))
        .cloned()
        .collect();

    let latest = latest_reports(reports);
    let last_seen = |pet: &Pet| -> DateTime<Utc> {
        latest
            .get(&pet.id)
            .map_or(pet.created_at, |report| report.created_at)
    };

    filtered.sort_by(|a, b| {
        let ordering = compare(a, b, query.sort, &last_seen);
        match query.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });

    filtered
}

fn compare<F>(a: &Pet, b: &Pet, key: SortKey, last_seen: &F) -> Ordering
where
    F: Fn(&Pet) -> DateTime<Utc>,
{
    match key {
        SortKey::Recent => last_seen(a).cmp(&last_seen(b)),
        SortKey::Name => a
            .name
            .as_deref()
            .unwrap_or("")
            .to_lowercase()
            .cmp(&b.name.as_deref().unwrap_or("").to_lowercase()),
        SortKey::Status => a.status.as_str().cmp(b.status.as_str()),
        SortKey::Species => a.species.as_str().cmp(b.species.as_str()),
    }
}

trait OptionalFilter<T> {
    fn is_none_or_eq(&self, value: T) -> bool;
}

impl<T: PartialEq + Copy> OptionalFilter<T> for Option<T> {
    fn is_none_or_eq(&self, value: T) -> bool {
        self.map_or(true, |wanted| wanted == value)
    }
}

/// Pets keyed by id, for joining report lists back to their pets.
pub fn index_pets(pets: &[Pet]) -> HashMap<&PetId, &Pet> {
    pets.iter().map(|pet| (&pet.id, pet)).collect()
}
