use crate::service::SupportBundleService;

#[derive(Clone)]
pub struct AppState {
    pub service: SupportBundleService,
}

impl AppState {
    pub fn new(service: SupportBundleService) -> Self {
        Self { service }
    }
}
