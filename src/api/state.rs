use crate::monitor::MonitorHandle;

#[derive(Clone)]
pub struct AppState {
    pub monitor: MonitorHandle,
}
