//! 浏览器连接
//!
//! 两种获取浏览器的方式：连接调试端口上已运行的浏览器，或自行启动无头浏览器。
//! 两者都在后台任务中处理浏览器事件，返回的 `Browser` 由编排层持有。

pub mod connection;
pub mod headless;

pub use connection::connect_to_browser;
pub use headless::launch_headless_browser;
