use gatehouse::entities;
use gatehouse::entities::client::ClientType;
use gatehouse::settings::Settings;
use gatehouse::store;
use sea_orm::DatabaseConnection;

/// Settings tuned for tests: no slow-down window on device polls so polls in
/// a tight loop behave deterministically.
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.server.public_base_url = Some("https://login.test".to_string());
    settings.grants.device_poll_interval_secs = 0;
    settings
}

/// Builder for creating test tenants
pub struct TenantBuilder {
    name: String,
    default_rate_limit: i64,
    allow_unlimited_rate: bool,
}

impl TenantBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            default_rate_limit: 1000,
            allow_unlimited_rate: false,
        }
    }

    pub fn with_default_rate_limit(mut self, limit: i64) -> Self {
        self.default_rate_limit = limit;
        self
    }

    pub fn unlimited_rate(mut self) -> Self {
        self.allow_unlimited_rate = true;
        self
    }

    pub async fn create(self, db: &DatabaseConnection) -> entities::tenant::Model {
        store::tenants::create_tenant(
            db,
            &self.name,
            self.default_rate_limit,
            self.allow_unlimited_rate,
        )
        .await
        .expect("Failed to create test tenant")
    }
}

/// Builder for creating test OAuth clients
pub struct ClientBuilder {
    tenant_id: String,
    client_name: Option<String>,
    client_type: ClientType,
    redirect_uris: Vec<String>,
    scopes: Vec<String>,
    max_refresh_token_count: i64,
}

impl ClientBuilder {
    pub fn new(tenant_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            client_name: Some("Test Client".to_string()),
            client_type: ClientType::Confidential,
            redirect_uris: vec!["http://localhost:3000/callback".to_string()],
            scopes: vec![
                "openid".to_string(),
                "profile".to_string(),
                "email".to_string(),
                "offline_access".to_string(),
            ],
            max_refresh_token_count: 50,
        }
    }

    pub fn device(mut self) -> Self {
        self.client_type = ClientType::Device;
        self
    }

    pub fn public(mut self) -> Self {
        self.client_type = ClientType::Public;
        self
    }

    pub fn with_redirect_uri(mut self, uri: &str) -> Self {
        self.redirect_uris = vec![uri.to_string()];
        self
    }

    pub fn with_scopes(mut self, scopes: &[&str]) -> Self {
        self.scopes = scopes.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_max_refresh_count(mut self, count: i64) -> Self {
        self.max_refresh_token_count = count;
        self
    }

    pub async fn create(self, db: &DatabaseConnection) -> store::tenants::CreatedClient {
        store::tenants::create_client(
            db,
            store::tenants::NewClient {
                tenant_id: self.tenant_id,
                client_name: self.client_name,
                client_type: self.client_type,
                redirect_uris: self.redirect_uris,
                scopes: self.scopes,
                max_refresh_token_count: self.max_refresh_token_count,
            },
        )
        .await
        .expect("Failed to create test client")
    }
}

/// Builder for creating test users
pub struct UserBuilder {
    tenant_id: String,
    username: String,
    password: String,
    email: Option<String>,
}

impl UserBuilder {
    pub fn new(tenant_id: &str, username: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            username: username.to_string(),
            password: "password123".to_string(),
            email: None,
        }
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub async fn create(self, db: &DatabaseConnection) -> entities::user::Model {
        store::tenants::create_user(
            db,
            &self.tenant_id,
            &self.username,
            &self.password,
            self.email,
        )
        .await
        .expect("Failed to create test user")
    }
}
