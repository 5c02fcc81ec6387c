use std::sync::Arc;

use axum::Router;

use fleetwatch_core::Orchestrator;
use fleetwatch_core::testutil::{ManualClock, MockRemoteSession, test_settings};
use fleetwatch_server::routes;
use fleetwatch_server::state::AppState;

pub const TEST_ADMIN_TOKEN: &str = "test-admin-token";
pub const GPS_VIEW: &str = "divDevicesListInfo";
pub const ALARM_VIEW: &str = "divExceptionMessageDivInfo";

pub struct TestApp {
    pub router: Router,
    pub orchestrator: Orchestrator,
    pub remote: MockRemoteSession,
    pub clock: ManualClock,
}

fn build(admin_token: Option<&str>) -> TestApp {
    let remote = MockRemoteSession::new();
    let clock = ManualClock::fixed();
    let orchestrator =
        Orchestrator::with_clock(remote.clone(), &test_settings(), Arc::new(clock.clone()));
    let state = Arc::new(AppState {
        orchestrator: orchestrator.clone(),
        admin_token: admin_token.map(str::to_string),
    });

    TestApp {
        router: routes::router(state),
        orchestrator,
        remote,
        clock,
    }
}

/// App with an admin token configured.
pub fn setup_test_app() -> TestApp {
    build(Some(TEST_ADMIN_TOKEN))
}

/// App with the admin endpoints open.
pub fn setup_test_app_no_auth() -> TestApp {
    build(None)
}
