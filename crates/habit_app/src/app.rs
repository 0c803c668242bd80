use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use habit_domain::overview::{top_level_items, week_completion, week_start_for};
use habit_domain::value::{format_seconds, percent};
use habit_domain::{
    BindingTarget, EvaluationResult, HabitService, HierarchyPolicy, Item, ItemKind, ItemSink,
};
use habit_sync::{MemoryStore, StartOutcome, SyncedTimer, SystemClock, TimerConfig};
use tracing::{debug, info, warn};

use crate::seed::initial_items;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub(crate) user_id: String,
    pub(crate) date: Option<NaiveDate>,
    pub(crate) countdown_seconds: u32,
    pub(crate) allow_multi_parent: bool,
    pub(crate) timer_demo_seconds: u64,
    pub(crate) timer_item: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(user) = std::env::var("HABIT_USER_ID") {
            let user = user.trim();
            if !user.is_empty() {
                config.user_id = user.to_string();
            }
        }
        if let Ok(date) = std::env::var("HABIT_DATE") {
            match NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d") {
                Ok(value) => config.date = Some(value),
                Err(err) => warn!(%date, %err, "ignoring HABIT_DATE"),
            }
        }
        if let Ok(countdown) = std::env::var("HABIT_COUNTDOWN_SECONDS") {
            if let Ok(value) = countdown.trim().parse::<u32>() {
                config.countdown_seconds = value;
            }
        }
        if let Ok(flag) = std::env::var("HABIT_ALLOW_MULTI_PARENT") {
            config.allow_multi_parent =
                matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(seconds) = std::env::var("HABIT_TIMER_DEMO_SECONDS") {
            if let Ok(value) = seconds.trim().parse::<u64>() {
                config.timer_demo_seconds = value;
            }
        }
        if let Ok(item) = std::env::var("HABIT_TIMER_ITEM") {
            if !item.trim().is_empty() {
                config.timer_item = item.trim().to_string();
            }
        }
        Ok(config)
    }

    pub fn policy(&self) -> HierarchyPolicy {
        HierarchyPolicy {
            enforce_single_parent: !self.allow_multi_parent,
        }
    }

    pub fn timer_config(&self) -> TimerConfig {
        TimerConfig {
            countdown_seconds: self.countdown_seconds,
            ..TimerConfig::for_user(self.user_id.clone())
        }
    }

    fn report_date(&self) -> NaiveDate {
        self.date.unwrap_or_else(|| Local::now().date_naive())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let timer = TimerConfig::default();
        Self {
            user_id: timer.user_id,
            date: None,
            countdown_seconds: timer.countdown_seconds,
            allow_multi_parent: false,
            timer_demo_seconds: 0,
            timer_item: "meditation".to_string(),
        }
    }
}

/// Item writes go to the log; a remote-backed sink would persist them.
struct TracingSink;

impl ItemSink for TracingSink {
    fn update_item(&self, item: &Item) -> Result<()> {
        debug!(item_id = %item.id, "item updated");
        Ok(())
    }

    fn delete_item(&self, id: &str) -> Result<()> {
        debug!(item_id = id, "item deleted");
        Ok(())
    }
}

pub fn build_service(config: &AppConfig) -> Result<HabitService> {
    Ok(HabitService::builder()
        .with_items(initial_items()?)
        .with_policy(config.policy())
        .with_sink(Box::new(TracingSink))
        .build())
}

fn describe(item: &Item, result: &EvaluationResult) -> String {
    let mark = if result.completed { "x" } else { " " };
    let mut line = format!("[{mark}] {}", item.name);
    match &item.kind {
        ItemKind::Habit(habit) => {
            let adapter = habit.adapter();
            let current = result.current_value.unwrap_or(0.0);
            let shown = adapter.to_display(current);
            let shown = if shown.is_empty() { "0".to_string() } else { shown };
            let goal = adapter.target_to_raw(habit.daily_goal);
            line.push_str(&format!(
                " {shown}/{} {} ({}%)",
                habit.daily_goal,
                habit.unit,
                percent(current, goal)
            ));
            if let (Some(level), Some(index)) = (result.level, result.main_level_index) {
                let tier = habit.main_levels.get(index).map(String::as_str).unwrap_or("-");
                line.push_str(&format!(
                    " Lv{level} [{tier}] {}/{}",
                    result.total_count.unwrap_or(0.0),
                    result.next_level_total.unwrap_or(0.0)
                ));
            }
        }
        ItemKind::Group(group) => {
            line.push_str(&format!(
                " {}/{}",
                result.count.unwrap_or(0),
                if group.target_count == 0 {
                    result.total_children.unwrap_or(0)
                } else {
                    group.target_count
                }
            ));
            if let Some(level) = result.level {
                line.push_str(&format!(
                    " Lv{level} ({}%)",
                    result.total_count.unwrap_or(0.0)
                ));
            }
        }
        ItemKind::Unknown => {}
    }
    line
}

/// Depth-first rendering; an item already on the ancestor path is not re-entered.
fn render_tree(
    service: &HabitService,
    id: &str,
    date: NaiveDate,
    path: &mut Vec<String>,
    out: &mut Vec<String>,
) {
    let Some(item) = service.get_item(id) else {
        return;
    };
    let result = service.evaluate(id, date);
    out.push(format!("{}{}", "  ".repeat(path.len()), describe(&item, &result)));
    path.push(item.id.clone());
    for child in item.children() {
        if !path.contains(child) {
            render_tree(service, child, date, path, out);
        }
    }
    path.pop();
}

/// Daily tree followed by the weekly completion grid.
pub fn report(service: &HabitService, date: NaiveDate) -> Vec<String> {
    let mut lines = vec![format!("Habits for {date}")];
    for id in service.top_level_ids() {
        render_tree(service, &id, date, &mut Vec::new(), &mut lines);
    }

    let week_start = week_start_for(date);
    lines.push(String::new());
    lines.push(format!("Week of {week_start}"));
    let items = service.items();
    for row in week_completion(&items, week_start) {
        let cells: String = row
            .days
            .iter()
            .map(|cell| match (cell.active, cell.completed) {
                (false, _) => '-',
                (true, true) => 'x',
                (true, false) => '.',
            })
            .collect();
        lines.push(format!("{}{cells} {}", "  ".repeat(row.depth), row.name));
    }
    debug!(roots = top_level_items(&items).len(), "report rendered");
    lines
}

async fn timer_demo(config: &AppConfig, service: &HabitService, date: NaiveDate) -> Result<()> {
    let item = service
        .get_item(&config.timer_item)
        .with_context(|| format!("timer item `{}` not found", config.timer_item))?;
    let target = BindingTarget::for_item(&item, date)
        .with_context(|| format!("`{}` is not a habit", item.id))?;
    let timer_config = config.timer_config();
    let store = Arc::new(MemoryStore::with_max_attempts(
        timer_config.max_transaction_attempts,
    ));
    let timer = SyncedTimer::new(store, Arc::new(SystemClock), timer_config);

    info!(%target, countdown = config.countdown_seconds, "starting timer");
    match timer.start(target.clone()).await? {
        StartOutcome::Started => {}
        outcome => {
            warn!(?outcome, "timer did not start");
            return Ok(());
        }
    }
    tokio::time::sleep(Duration::from_secs(config.timer_demo_seconds)).await;
    println!("Timer: {}", format_seconds(timer.display_seconds()));
    let committed = timer.stop_and_commit(service).await?;
    let adapter = item
        .as_habit()
        .map(|habit| habit.adapter())
        .unwrap_or_default();
    println!(
        "Committed {} to {}; now {} {}",
        format_seconds(committed),
        target,
        adapter.to_display(service.raw_value_at(&target)),
        item.as_habit().map(|habit| habit.unit.as_str()).unwrap_or("")
    );
    Ok(())
}

pub async fn run(config: AppConfig) -> Result<()> {
    let date = config.report_date();
    info!(user = %config.user_id, %date, "starting habit tracker");
    let service = build_service(&config)?;

    for line in report(&service, date) {
        println!("{line}");
    }

    if config.timer_demo_seconds > 0 {
        timer_demo(&config, &service, date).await?;
    }
    Ok(())
}
