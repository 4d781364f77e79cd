pub mod jrxml;
pub mod layout;
pub mod model;
