pub mod normalized;
pub mod time_limit;
