pub mod catalog;
pub mod data;
pub mod forms;
pub mod hosting;
pub mod settings;
pub mod site;
