//! Starter items for a fresh account.

use anyhow::{Context, Result};
use habit_domain::Item;
use serde_json::json;

/// The sample tree: a workout group averaging a plain habit and a nested
/// push-up group, plus a standalone minutes habit for the timer.
pub fn initial_items() -> Result<Vec<Item>> {
    let raw = json!([
        {
            "id": "workout",
            "type": "group",
            "name": "workout",
            "children": ["pull_up", "pushupGroup"],
            "targetCount": 2,
            "levelEnabled": true,
            "levelStrategy": "avg"
        },
        {
            "id": "pull_up",
            "type": "habit",
            "name": "pull_up",
            "unit": "reps",
            "dailyGoal": 8,
            "startDate": "2024-01-01",
            "endDate": null,
            "levelEnabled": false,
            "progressByDate": { "2025-06-27": 7 }
        },
        {
            "id": "pushupGroup",
            "type": "group",
            "name": "Push-Up Training",
            "children": ["pushupLv", "pushup"],
            "targetCount": 1,
            "levelEnabled": true,
            "levelStrategy": "max"
        },
        {
            "id": "pushupLv",
            "type": "habit",
            "name": "Push-Up",
            "unit": "reps",
            "dailyGoal": 50,
            "levelEnabled": true,
            "levelThreshold": 100,
            "currentMainLevel": 0,
            "mainLevels": ["Push-Up", "Elevation push-ups", "One Hand Push-Up"],
            "progressByMainLevel": {
                "0": { "2025-06-27": 130 },
                "1": { "2025-06-27": 5 }
            }
        },
        {
            "id": "pushup",
            "type": "habit",
            "name": "Elevation push-ups",
            "unit": "reps",
            "dailyGoal": 50,
            "levelEnabled": true,
            "levelThreshold": 100,
            "currentMainLevel": 0,
            "mainLevels": ["Push-Up"],
            "progressByMainLevel": {
                "0": { "2025-06-27": 180 },
                "1": { "2025-06-27": 5 }
            }
        },
        {
            "id": "meditation",
            "type": "habit",
            "name": "Meditation",
            "unit": "minutes",
            "dailyGoal": 10,
            "progressByDate": { "2025-06-27": 300 }
        }
    ]);
    serde_json::from_value(raw).context("seed items do not decode")
}
