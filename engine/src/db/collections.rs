//! Named collections of the record store
//!
//! Each collection maps to one table. The column list doubles as an
//! identifier whitelist: the store refuses to build SQL with a column name
//! that is not listed here.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    UserProfiles,
    UserContext,
    CoachKnowledge,
    WeightEntries,
    MealLogs,
    WorkoutLogs,
    TrainingPlanVersions,
    NutritionPlanVersions,
    Goals,
    ChangeEvents,
}

impl Collection {
    pub const ALL: [Collection; 11] = [
        Collection::Users,
        Collection::UserProfiles,
        Collection::UserContext,
        Collection::CoachKnowledge,
        Collection::WeightEntries,
        Collection::MealLogs,
        Collection::WorkoutLogs,
        Collection::TrainingPlanVersions,
        Collection::NutritionPlanVersions,
        Collection::Goals,
        Collection::ChangeEvents,
    ];

    pub fn table(self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::UserProfiles => "user_profiles",
            Collection::UserContext => "user_context",
            Collection::CoachKnowledge => "coach_knowledge",
            Collection::WeightEntries => "weight_entries",
            Collection::MealLogs => "meal_logs",
            Collection::WorkoutLogs => "workout_logs",
            Collection::TrainingPlanVersions => "training_plan_versions",
            Collection::NutritionPlanVersions => "nutrition_plan_versions",
            Collection::Goals => "goals",
            Collection::ChangeEvents => "change_events",
        }
    }

    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Collection::Users => &[
                "id",
                "first_name",
                "last_name",
                "username",
                "role",
                "created_at",
            ],
            Collection::UserProfiles => &[
                "user_id",
                "gender",
                "age",
                "height_cm",
                "current_weight_kg",
                "training_days_per_week",
                "goals",
                "fitness_level",
                "training_location",
                "available_equipment",
                "injury_history",
                "nutrition_preferences",
                "created_at",
                "updated_at",
            ],
            Collection::UserContext => &["user_id", "key", "value", "source", "updated_at"],
            Collection::CoachKnowledge => &["coach_id", "key", "value", "updated_at"],
            Collection::WeightEntries => &[
                "id",
                "user_id",
                "date",
                "kg",
                "created_at",
                "updated_at",
            ],
            Collection::MealLogs => &[
                "id",
                "user_id",
                "date",
                "meal_type",
                "description",
                "total_calories",
                "total_protein_g",
                "total_carbs_g",
                "total_fat_g",
                "items",
                "created_at",
            ],
            Collection::WorkoutLogs => &[
                "id",
                "user_id",
                "date",
                "description",
                "entries",
                "created_at",
                "updated_at",
            ],
            Collection::TrainingPlanVersions => &[
                "id",
                "user_id",
                "version",
                "days",
                "reason",
                "created_at",
            ],
            Collection::NutritionPlanVersions => &[
                "id",
                "user_id",
                "version",
                "kcal",
                "protein_grams",
                "carbs_grams",
                "fat_grams",
                "meals",
                "notes",
                "reason",
                "created_at",
            ],
            Collection::Goals => &[
                "id",
                "user_id",
                "version",
                "is_current",
                "target_weight_kg",
                "strength_targets",
                "horizon_weeks",
                "plan",
                "created_at",
            ],
            Collection::ChangeEvents => &[
                "id",
                "user_id",
                "type",
                "summary",
                "actor",
                "before_data",
                "after_data",
                "created_at",
            ],
        }
    }

    /// Columns holding structured values, stored as JSON text
    pub fn json_columns(self) -> &'static [&'static str] {
        match self {
            Collection::MealLogs => &["items"],
            Collection::WorkoutLogs => &["entries"],
            Collection::TrainingPlanVersions => &["days"],
            Collection::NutritionPlanVersions => &["meals"],
            Collection::Goals => &["plan"],
            Collection::ChangeEvents => &["before_data", "after_data"],
            _ => &[],
        }
    }

    /// Columns stored as 0/1 integers and surfaced as booleans
    pub fn bool_columns(self) -> &'static [&'static str] {
        match self {
            Collection::Goals => &["is_current"],
            _ => &[],
        }
    }

    /// Append-only collections numbered per user
    pub fn is_versioned(self) -> bool {
        matches!(
            self,
            Collection::TrainingPlanVersions | Collection::NutritionPlanVersions | Collection::Goals
        )
    }

    pub fn has_column(self, column: &str) -> bool {
        self.columns().contains(&column)
    }

    pub fn is_json_column(self, column: &str) -> bool {
        self.json_columns().contains(&column)
    }

    pub fn is_bool_column(self, column: &str) -> bool {
        self.bool_columns().contains(&column)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versioned_collections_have_version_column() {
        for collection in Collection::ALL {
            if collection.is_versioned() {
                assert!(collection.has_column("version"), "{}", collection);
                assert!(collection.has_column("user_id"), "{}", collection);
            }
        }
    }

    #[test]
    fn test_special_columns_are_whitelisted() {
        for collection in Collection::ALL {
            for column in collection
                .json_columns()
                .iter()
                .chain(collection.bool_columns())
            {
                assert!(collection.has_column(column), "{}.{}", collection, column);
            }
        }
    }
}
