pub mod consolidate;
pub mod doctor;
pub mod run;
