use crate::entities;
use crate::entities::client::ClientType;
use crate::errors::GatehouseError;
use crate::secrets;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};

use super::{encode_string_list, parse_string_list};

pub async fn create_tenant(
    db: &DatabaseConnection,
    name: &str,
    default_rate_limit: i64,
    allow_unlimited_rate: bool,
) -> Result<entities::tenant::Model, GatehouseError> {
    let tenant = entities::tenant::ActiveModel {
        tenant_id: Set(secrets::random_id()),
        name: Set(name.to_string()),
        enabled: Set(1),
        allow_unlimited_rate: Set(if allow_unlimited_rate { 1 } else { 0 }),
        default_rate_limit: Set(default_rate_limit),
        created_at: Set(secrets::now_ms()),
    };

    Ok(tenant.insert(db).await?)
}

pub async fn get_tenant(
    db: &DatabaseConnection,
    tenant_id: &str,
) -> Result<Option<entities::tenant::Model>, GatehouseError> {
    Ok(entities::Tenant::find_by_id(tenant_id).one(db).await?)
}

pub struct NewClient {
    pub tenant_id: String,
    pub client_name: Option<String>,
    pub client_type: ClientType,
    pub redirect_uris: Vec<String>,
    pub scopes: Vec<String>,
    pub max_refresh_token_count: i64,
}

/// Freshly created client; the clear-text secret is returned exactly once.
pub struct CreatedClient {
    pub model: entities::client::Model,
    pub client_secret: String,
}

pub async fn create_client(
    db: &DatabaseConnection,
    input: NewClient,
) -> Result<CreatedClient, GatehouseError> {
    let client_secret = secrets::random_secret();

    let client = entities::client::ActiveModel {
        client_id: Set(secrets::random_id()),
        tenant_id: Set(input.tenant_id),
        client_secret_hash: Set(secrets::hash_secret(&client_secret)),
        client_name: Set(input.client_name),
        client_type: Set(input.client_type),
        redirect_uris: Set(encode_string_list(&input.redirect_uris)?),
        scopes: Set(encode_string_list(&input.scopes)?),
        enabled: Set(1),
        marked_for_delete: Set(0),
        max_refresh_token_count: Set(input.max_refresh_token_count),
        created_at: Set(secrets::now_ms()),
    };

    let model = client.insert(db).await?;
    Ok(CreatedClient {
        model,
        client_secret,
    })
}

pub async fn get_client(
    db: &DatabaseConnection,
    client_id: &str,
) -> Result<Option<entities::client::Model>, GatehouseError> {
    Ok(entities::Client::find_by_id(client_id).one(db).await?)
}

pub fn client_redirect_uris(client: &entities::client::Model) -> Vec<String> {
    parse_string_list(&client.redirect_uris)
}

pub fn client_scopes(client: &entities::client::Model) -> Vec<String> {
    parse_string_list(&client.scopes)
}

pub fn verify_client_secret(client: &entities::client::Model, presented: &str) -> bool {
    secrets::hash_secret(presented) == client.client_secret_hash
}

pub async fn create_user(
    db: &DatabaseConnection,
    tenant_id: &str,
    username: &str,
    password: &str,
    email: Option<String>,
) -> Result<entities::user::Model, GatehouseError> {
    use argon2::password_hash::{rand_core::OsRng, SaltString};
    use argon2::{Argon2, PasswordHasher};

    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| GatehouseError::Other(format!("Password hashing failed: {}", e)))?
        .to_string();

    let user = entities::user::ActiveModel {
        user_id: Set(secrets::random_id()),
        tenant_id: Set(tenant_id.to_string()),
        username: Set(username.to_string()),
        password_hash: Set(password_hash),
        email: Set(email),
        enabled: Set(1),
        locked: Set(0),
        federated_subject: Set(None),
        created_at: Set(secrets::now_ms()),
    };

    Ok(user.insert(db).await?)
}

/// Users provisioned through the federated broker authenticate upstream; they
/// get an unguessable local password so the password path never matches.
pub async fn create_federated_user(
    db: &DatabaseConnection,
    tenant_id: &str,
    username: &str,
    federated_subject: &str,
    email: Option<String>,
) -> Result<entities::user::Model, GatehouseError> {
    let user = create_user(db, tenant_id, username, &secrets::random_secret(), email).await?;

    let mut active: entities::user::ActiveModel = user.into();
    active.federated_subject = Set(Some(federated_subject.to_string()));
    Ok(active.update(db).await?)
}

pub async fn get_user(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<Option<entities::user::Model>, GatehouseError> {
    Ok(entities::User::find_by_id(user_id).one(db).await?)
}

pub async fn get_user_by_username(
    db: &DatabaseConnection,
    tenant_id: &str,
    username: &str,
) -> Result<Option<entities::user::Model>, GatehouseError> {
    use entities::user::Column;

    Ok(entities::User::find()
        .filter(Column::TenantId.eq(tenant_id))
        .filter(Column::Username.eq(username))
        .one(db)
        .await?)
}

pub async fn get_user_by_federated_subject(
    db: &DatabaseConnection,
    tenant_id: &str,
    federated_subject: &str,
) -> Result<Option<entities::user::Model>, GatehouseError> {
    use entities::user::Column;

    Ok(entities::User::find()
        .filter(Column::TenantId.eq(tenant_id))
        .filter(Column::FederatedSubject.eq(federated_subject))
        .one(db)
        .await?)
}

/// Password check only; the caller is responsible for policy admission
/// (lockout/pause) before and the failure ledger after.
pub async fn verify_user_password(
    db: &DatabaseConnection,
    tenant_id: &str,
    username: &str,
    password: &str,
) -> Result<Option<entities::user::Model>, GatehouseError> {
    use argon2::{Argon2, PasswordHash, PasswordVerifier};

    let user = match get_user_by_username(db, tenant_id, username).await? {
        Some(u) if u.enabled == 1 => u,
        _ => return Ok(None),
    };

    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|e| GatehouseError::Other(format!("Invalid password hash: {}", e)))?;

    if Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
    {
        Ok(Some(user))
    } else {
        Ok(None)
    }
}

pub async fn set_user_locked(
    db: &DatabaseConnection,
    user_id: &str,
    locked: bool,
) -> Result<(), GatehouseError> {
    if let Some(user) = entities::User::find_by_id(user_id).one(db).await? {
        let mut active: entities::user::ActiveModel = user.into();
        active.locked = Set(if locked { 1 } else { 0 });
        active.update(db).await?;
    }
    Ok(())
}
