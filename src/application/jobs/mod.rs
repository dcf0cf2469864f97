mod context;
mod flush_likes;

pub use context::{FlushLikesContext, job_failed};
pub use flush_likes::{
    DEFAULT_FLUSH_SCHEDULE, FlushIncomplete, FlushLikesJob, FlushScheduler, InvalidSchedule,
    flush_likes_schedule, process_flush_likes_job,
};
