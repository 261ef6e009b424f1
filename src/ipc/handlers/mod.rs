pub mod admin;
pub mod auth;
pub mod backup;
pub mod clearance;
pub mod core;
pub mod enrollments;
pub mod faculty;
pub mod grades;
pub mod notifications;
pub mod programs;
pub mod settings;
pub mod students;
pub mod subjects;
