use serde::Deserialize;

use crate::models::{NutrientProfile, NutritionRecord};

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub foods: Vec<FoodItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodItem {
    pub fdc_id: Option<i64>,
    pub description: Option<String>,
    pub brand_owner: Option<String>,
    #[serde(default)]
    pub food_nutrients: Vec<FoodNutrient>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodNutrient {
    pub nutrient_number: Option<String>,
    pub unit_name: Option<String>,
    pub value: Option<f64>,
}

// USDA nutrient numbers
const ENERGY_KCAL: &str = "208";
const PROTEIN: &str = "203";
const CARBS: &str = "205";
const FAT: &str = "204";
const SODIUM: &str = "307";
const CAFFEINE: &str = "262";
const SUGARS: &str = "269";
const FIBER: &str = "291";

impl FoodItem {
    fn nutrient(&self, number: &str) -> Option<f64> {
        self.food_nutrients
            .iter()
            .find(|n| n.nutrient_number.as_deref() == Some(number))
            .and_then(|n| n.value)
    }
}

#[must_use]
pub fn food_to_profile(food: &FoodItem) -> Option<NutrientProfile> {
    let description = food.description.clone().filter(|d| !d.is_empty())?;
    let calories = food.nutrient(ENERGY_KCAL)?;

    Some(NutrientProfile {
        description,
        calories_per_100g: calories,
        protein_per_100g: food.nutrient(PROTEIN),
        carbs_per_100g: food.nutrient(CARBS),
        fat_per_100g: food.nutrient(FAT),
        sugar_per_100g: food.nutrient(SUGARS),
        fiber_per_100g: food.nutrient(FIBER),
        sodium_mg_per_100g: food.nutrient(SODIUM),
        caffeine_mg_per_100g: food.nutrient(CAFFEINE),
    })
}

/// First search hit that carries an energy value.
#[must_use]
pub fn best_profile(response: &SearchResponse) -> Option<NutrientProfile> {
    response.foods.iter().find_map(food_to_profile)
}

/// Fill only the fields the record is missing. Without a weight the profile is taken as one 100 g serving.
#[must_use]
pub fn enrich(mut record: NutritionRecord, profile: &NutrientProfile) -> NutritionRecord {
    let scale = record.grams.map_or(1.0, |g| g / 100.0);
    let scaled = |v: Option<f64>| v.map(|x| (x * scale * 100.0).round() / 100.0);

    record.calories = record.calories.or(scaled(Some(profile.calories_per_100g)));
    record.protein_g = record.protein_g.or(scaled(profile.protein_per_100g));
    record.carbs_g = record.carbs_g.or(scaled(profile.carbs_per_100g));
    record.fat_g = record.fat_g.or(scaled(profile.fat_per_100g));
    record.sugar_g = record.sugar_g.or(scaled(profile.sugar_per_100g));
    record.fiber_g = record.fiber_g.or(scaled(profile.fiber_per_100g));
    record.sodium_mg = record.sodium_mg.or(scaled(profile.sodium_mg_per_100g));
    record.caffeine_mg = record.caffeine_mg.or(scaled(profile.caffeine_mg_per_100g));
    record
}
