mod support;

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use jce::app::{self, ExtractRequest, ManualDecrypt, ManualStep, Target};
use jce::config::ResolvedConfig;
use jce::jenkins::DecryptOptions;
use support::{
    auth_session, fast_config, html, mount_console, mount_probe, result_page, script_contains,
};
use secrecy::SecretString;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CREDENTIALS_XML: &str = r#"<?xml version='1.1' encoding='UTF-8'?>
<com.cloudbees.plugins.credentials.SystemCredentialsProvider plugin="credentials@1319">
  <domainCredentialsMap class="hudson.util.CopyOnWriteMap$Hash">
    <entry>
      <java.util.concurrent.CopyOnWriteArrayList>
        <com.cloudbees.plugins.credentials.impl.UsernamePasswordCredentialsImpl>
          <scope>GLOBAL</scope>
          <id>jenkins</id>
          <description>controller</description>
          <username>jenkins</username>
          <password>{SYSTEMSECRET}</password>
        </com.cloudbees.plugins.credentials.impl.UsernamePasswordCredentialsImpl>
        <com.cloudbees.plugins.credentials.impl.UsernamePasswordCredentialsImpl>
          <scope>GLOBAL</scope>
          <id>nexus-aai</id>
          <description>Nexus aai &amp; friends</description>
          <username>aai</username>
          <password>{CIPHERAAI}</password>
        </com.cloudbees.plugins.credentials.impl.UsernamePasswordCredentialsImpl>
        <com.cloudbees.plugins.credentials.impl.UsernamePasswordCredentialsImpl>
          <scope>GLOBAL</scope>
          <id>nexus-so</id>
          <description>Nexus so</description>
          <username>so</username>
          <password>{CIPHERSO}</password>
        </com.cloudbees.plugins.credentials.impl.UsernamePasswordCredentialsImpl>
        <com.cloudbees.plugins.credentials.impl.UsernamePasswordCredentialsImpl>
          <scope>GLOBAL</scope>
          <id>nexus-so-dup</id>
          <description>Nexus so again</description>
          <username>so</username>
          <password>{CIPHERSO2}</password>
        </com.cloudbees.plugins.credentials.impl.UsernamePasswordCredentialsImpl>
      </java.util.concurrent.CopyOnWriteArrayList>
    </entry>
  </domainCredentialsMap>
</com.cloudbees.plugins.credentials.SystemCredentialsProvider>
"#;

fn config(dir: &TempDir) -> Result<ResolvedConfig> {
    let mut config = ResolvedConfig::load_or_default(&dir.path().join("jce.toml"))?;
    config.auth.cache_sessions = false;
    config.decrypt = fast_config();
    Ok(config)
}

#[tokio::test]
async fn extracts_and_writes_successful_subset() -> Result<()> {
    let server = MockServer::start().await;
    mount_probe(&server).await;
    mount_console(&server).await;
    Mock::given(method("POST"))
        .and(path("/manage/script"))
        .and(script_contains("'{CIPHERAAI}'"))
        .respond_with(html(result_page("aai-password")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/manage/script"))
        .and(script_contains("'{CIPHERSO}'"))
        .respond_with(html(result_page("ERROR: secret could not be decrypted")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/manage/script"))
        .and(script_contains("SYSTEMSECRET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new()?;
    let credentials_file = dir.path().join("credentials.xml");
    std::fs::write(&credentials_file, CREDENTIALS_XML)?;
    let output = dir.path().join("out/credentials.txt");

    let config = config(&dir)?;
    let connection = app::connect_with(&config, auth_session(&server));
    let request = ExtractRequest {
        target: Target {
            url: server.uri(),
            host: None,
        },
        credentials_file,
        remote_path: config.jenkins.remote_credentials_path.clone(),
        fetch: false,
        pattern: None,
        output: output.clone(),
        options: DecryptOptions::default(),
        manual: None,
    };
    let result = app::extract(&connection, &request).await?;

    assert_eq!(result.requested, 2);
    assert_eq!(result.succeeded, 1);
    assert_eq!(result.failed, 1);
    assert_eq!(result.skipped_duplicates, vec!["so".to_string()]);
    assert_eq!(result.failures[0].identifier, "so");
    assert_eq!(result.failures[0].kind, "script_execution");
    assert_eq!(std::fs::read_to_string(&output)?, "aai-password aai\n");
    Ok(())
}

#[tokio::test]
async fn pattern_limits_what_is_decrypted() -> Result<()> {
    let server = MockServer::start().await;
    mount_probe(&server).await;
    mount_console(&server).await;
    Mock::given(method("POST"))
        .and(path("/manage/script"))
        .and(script_contains("'{CIPHERAAI}'"))
        .respond_with(html(result_page("aai-password")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new()?;
    let credentials_file = dir.path().join("credentials.xml");
    std::fs::write(&credentials_file, CREDENTIALS_XML)?;

    let config = config(&dir)?;
    let connection = app::connect_with(&config, auth_session(&server));
    let request = ExtractRequest {
        target: Target {
            url: server.uri(),
            host: None,
        },
        credentials_file,
        remote_path: config.jenkins.remote_credentials_path.clone(),
        fetch: false,
        pattern: Some("friends".into()),
        output: dir.path().join("credentials.txt"),
        options: DecryptOptions::default(),
        manual: None,
    };
    let result = app::extract(&connection, &request).await?;
    assert_eq!(result.requested, 1);
    assert_eq!(result.succeeded, 1);
    Ok(())
}

/// Answers every manual step with `<identifier>-typed` and remembers it.
#[derive(Default)]
struct TypedByHand {
    steps: Mutex<Vec<ManualStep>>,
}

#[async_trait]
impl ManualDecrypt for TypedByHand {
    async fn decrypt(&self, step: &ManualStep) -> anyhow::Result<Option<SecretString>> {
        self.steps.lock().unwrap().push(step.clone());
        Ok(Some(SecretString::from(format!("{}-typed", step.identifier))))
    }
}

#[tokio::test]
async fn refused_console_falls_back_to_manual_decryption() -> Result<()> {
    let server = MockServer::start().await;
    mount_probe(&server).await;
    mount_console(&server).await;
    Mock::given(method("POST"))
        .and(path("/manage/script"))
        .respond_with(ResponseTemplate::new(403))
        .expect(2)
        .mount(&server)
        .await;

    let dir = TempDir::new()?;
    let credentials_file = dir.path().join("credentials.xml");
    std::fs::write(&credentials_file, CREDENTIALS_XML)?;
    let output = dir.path().join("credentials.txt");

    let config = config(&dir)?;
    let connection = app::connect_with(&config, auth_session(&server));
    let manual = Arc::new(TypedByHand::default());
    let request = ExtractRequest {
        target: Target {
            url: server.uri(),
            host: None,
        },
        credentials_file,
        remote_path: config.jenkins.remote_credentials_path.clone(),
        fetch: false,
        pattern: None,
        output: output.clone(),
        options: DecryptOptions::default(),
        manual: Some(manual.clone() as Arc<dyn ManualDecrypt>),
    };
    let result = app::extract(&connection, &request).await?;

    assert_eq!(result.succeeded, 2);
    assert_eq!(result.decrypted_by_hand, 2);
    assert_eq!(result.failed, 0);
    assert_eq!(
        std::fs::read_to_string(&output)?,
        "aai-typed aai\nso-typed so\n"
    );

    let steps = manual.steps.lock().unwrap();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].console_url, format!("{}/manage/script", server.uri()));
    assert!(steps[0].script.starts_with("encrypted_pw = '{CIPHERAAI}'"));
    Ok(())
}

#[tokio::test]
async fn script_errors_are_not_offered_for_manual_decryption() -> Result<()> {
    let server = MockServer::start().await;
    mount_probe(&server).await;
    mount_console(&server).await;
    Mock::given(method("POST"))
        .and(path("/manage/script"))
        .respond_with(html(result_page("ERROR: secret could not be decrypted")))
        .mount(&server)
        .await;

    let dir = TempDir::new()?;
    let credentials_file = dir.path().join("credentials.xml");
    std::fs::write(&credentials_file, CREDENTIALS_XML)?;

    let config = config(&dir)?;
    let connection = app::connect_with(&config, auth_session(&server));
    let manual = Arc::new(TypedByHand::default());
    let request = ExtractRequest {
        target: Target {
            url: server.uri(),
            host: None,
        },
        credentials_file,
        remote_path: config.jenkins.remote_credentials_path.clone(),
        fetch: false,
        pattern: None,
        output: dir.path().join("credentials.txt"),
        options: DecryptOptions::default(),
        manual: Some(manual.clone() as Arc<dyn ManualDecrypt>),
    };
    let result = app::extract(&connection, &request).await?;

    assert_eq!(result.failed, 2);
    assert_eq!(result.decrypted_by_hand, 0);
    assert!(result.output_file.is_none());
    assert!(manual.steps.lock().unwrap().is_empty());
    Ok(())
}
