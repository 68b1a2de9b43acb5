pub mod driver;
pub mod package;
pub mod work_item;
