//! Integration tests for the loopback demo and command execution

use pam_cli::commands::CommandDispatcher;
use pam_cli::{run_demo, CliConfig, CliError, Commands, DemoReport};
use pam_core::{GroupConfig, RuntimeConfig};
use tokio::time::{timeout, Duration};
use tokio_test::{assert_err, assert_ok};

const WAIT: Duration = Duration::from_secs(15);

fn testing_config() -> CliConfig {
    CliConfig {
        runtime: RuntimeConfig::testing(),
        ..CliConfig::default()
    }
}

#[tokio::test]
async fn test_demo_answers_every_request_and_client() {
    let report = assert_ok!(timeout(WAIT, run_demo(&testing_config(), 4, 3)).await.unwrap());
    assert_eq!(
        report,
        DemoReport {
            requests_answered: 4,
            messages_dispatched: 6,
            clients_served: 3,
        }
    );
}

#[tokio::test]
async fn test_demo_with_group_config_uses_its_base() {
    let mut group = GroupConfig::new("org/default/moderator", "memory://loopback");
    group.base.auth_secret = Some("s".to_string());
    let config = CliConfig {
        app: group.into(),
        ..testing_config()
    };

    let report = assert_ok!(timeout(WAIT, run_demo(&config, 1, 1)).await.unwrap());
    assert_eq!(report.requests_answered, 1);
    assert_eq!(report.clients_served, 1);
}

#[tokio::test]
async fn test_demo_fails_without_auth_secret() {
    let mut config = testing_config();
    if let pam_core::AppConfig::P2p(app) = &mut config.app {
        app.base.auth_secret = None;
    }

    let err = assert_err!(run_demo(&config, 1, 1).await);
    assert!(matches!(err, CliError::Runtime(_)));
}

#[tokio::test]
async fn test_check_and_show_config_commands() {
    assert_ok!(CommandDispatcher::execute(Commands::Check, testing_config()).await);
    assert_ok!(CommandDispatcher::execute(Commands::ShowConfig, testing_config()).await);

    let mut broken = testing_config();
    broken.log_level = "loud".to_string();
    assert_err!(CommandDispatcher::execute(Commands::Check, broken).await);
}
