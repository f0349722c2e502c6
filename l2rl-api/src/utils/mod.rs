pub mod episode_log;
