mod test_scheduler;

pub mod utils;
