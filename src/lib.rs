// 模块划分：数据模型、硬件接口、执行器、显示、连通性、目录、状态机与主循环
pub mod actuator;
pub mod connectivity;
pub mod controller;
pub mod directory;
pub mod display;
pub mod error;
pub mod hal;
pub mod main_loop;
pub mod model;
pub mod proto;
pub mod reader;
pub mod serial;
pub mod serial_io;
pub mod settings;
pub mod status_led;
pub mod supervisor;

#[cfg(test)]
mod testing;
