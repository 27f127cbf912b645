pub mod app;
pub mod clear_schedule;
pub mod commands;
pub mod context;
pub mod dispatch;
pub mod env;
pub mod inspect;
pub mod jobs;
pub mod output;
pub mod post_now;
pub mod reset;
pub mod resync;
pub mod run;
pub mod runtime;
pub mod schedule;
pub mod status;
pub mod timers;
