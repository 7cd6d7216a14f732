pub mod capture;
pub mod run;
pub mod schedule;
