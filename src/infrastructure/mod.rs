pub mod chrome_driver;
pub mod driver;
pub mod js_executor;
pub mod session;

pub use chrome_driver::{ChromeDriver, ChromeSessionFactory};
pub use driver::{bounded, FormDriver, SessionFactory, SubmitDispatch};
pub use js_executor::JsExecutor;
pub use session::{FormSession, NavState};
