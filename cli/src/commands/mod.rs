mod auth;
mod day;
mod helpers;
mod insights;
mod migraine;
mod nutrition;
mod worker;

pub(crate) use auth::{LoginArgs, cmd_flags, cmd_login, cmd_logout};
pub(crate) use day::{cmd_day_clear, cmd_day_set, cmd_day_show};
pub(crate) use helpers::parse_offset;
pub(crate) use insights::{cmd_city, cmd_insights, cmd_metric_list, cmd_metric_reset, cmd_metric_set};
pub(crate) use migraine::{MigraineArgs, cmd_event_log, cmd_migraine_list, cmd_migraine_log};
pub(crate) use nutrition::{
    NutritionArgs, cmd_nutrition_add, cmd_nutrition_pending, cmd_nutrition_push,
    cmd_nutrition_remove,
};
pub(crate) use worker::{
    WorkerInputs, WorkerSet, cmd_worker_cancel, cmd_worker_enroll, cmd_worker_run,
    cmd_worker_status, cmd_worker_tick,
};
