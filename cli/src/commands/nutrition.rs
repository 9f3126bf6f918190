use anyhow::Result;
use chrono::Utc;
use tabled::{Table, Tabled, settings::Style};

use aura_core::models::NutritionRecord;
use aura_core::nutrition::manual_external_id;
use aura_core::service::{AuraService, FoodDataProvider};

use super::helpers::{parse_instant, print_json, truncate};

pub(crate) struct NutritionArgs {
    pub food: String,
    pub id: Option<String>,
    pub at: Option<String>,
    pub meal: Option<String>,
    pub grams: Option<f64>,
    pub calories: Option<f64>,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fat: Option<f64>,
    pub sugar: Option<f64>,
    pub fiber: Option<f64>,
    pub sodium: Option<f64>,
    pub caffeine: Option<f64>,
}

pub(crate) fn cmd_nutrition_add(service: &AuraService, args: NutritionArgs, json: bool) -> Result<()> {
    let record = NutritionRecord {
        external_id: args.id.unwrap_or_else(manual_external_id),
        timestamp: parse_instant(args.at.as_deref(), &service.offset())?,
        food_name: args.food,
        meal_type: args.meal,
        grams: args.grams,
        calories: args.calories,
        protein_g: args.protein,
        carbs_g: args.carbs,
        fat_g: args.fat,
        sugar_g: args.sugar,
        fiber_g: args.fiber,
        sodium_mg: args.sodium,
        caffeine_mg: args.caffeine,
        source: Some("manual".to_string()),
    };
    let item = service.queue_nutrition(&record)?;

    if json {
        print_json(&item)?;
    } else {
        println!(
            "Queued '{}' as {} (run `aura nutrition push` to upload)",
            record.food_name, item.entity_id
        );
    }
    Ok(())
}

pub(crate) fn cmd_nutrition_remove(service: &AuraService, external_id: &str, json: bool) -> Result<()> {
    let item = service.remove_nutrition(external_id)?;
    if json {
        print_json(&item)?;
    } else {
        println!("Queued delete of {external_id}");
    }
    Ok(())
}

pub(crate) fn cmd_nutrition_push(
    service: &AuraService,
    food: Option<&dyn FoodDataProvider>,
    json: bool,
) -> Result<()> {
    if food.is_none() {
        eprintln!("Note: no FoodData Central key set, missing nutrients will not be filled in");
    }
    let report = service.push_nutrition(food, Utc::now())?;

    if json {
        print_json(&report)?;
    } else {
        println!(
            "Pushed {}, failed {}, dropped {}",
            report.pushed, report.failed, report.dropped
        );
        let left = service.db().outbox_len()?;
        if left > 0 {
            println!("  {left} item(s) still queued");
        }
    }
    Ok(())
}

pub(crate) fn cmd_nutrition_pending(service: &AuraService, json: bool) -> Result<()> {
    let items = service.db().pending_outbox(100)?;

    if json {
        print_json(&items)?;
    } else if items.is_empty() {
        eprintln!("Nutrition outbox is empty.");
    } else {
        #[derive(Tabled)]
        struct PendingRow {
            #[tabled(rename = "ID")]
            id: i64,
            #[tabled(rename = "Op")]
            op: &'static str,
            #[tabled(rename = "Entry")]
            entity: String,
            #[tabled(rename = "Retries")]
            retries: i64,
            #[tabled(rename = "Last error")]
            error: String,
        }

        let rows: Vec<PendingRow> = items
            .iter()
            .map(|i| PendingRow {
                id: i.id,
                op: i.operation.as_str(),
                entity: truncate(&i.entity_id, 24),
                retries: i.retry_count,
                error: i
                    .last_error
                    .as_deref()
                    .map(|e| truncate(e, 40))
                    .unwrap_or_default(),
            })
            .collect();
        println!("{}", Table::new(&rows).with(Style::rounded()));
    }
    Ok(())
}
