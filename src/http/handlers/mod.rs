pub mod add_key;
pub mod cancel;
pub mod list_current_tasks;
pub mod logs;
pub mod result;
pub mod robots;
pub mod start_task;
pub mod status;
pub mod use_cases;
