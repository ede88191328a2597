pub mod approval;
pub mod content;
