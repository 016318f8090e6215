use crate::entities;
use crate::entities::federated_authorization::FederatedRelType;
use crate::errors::GatehouseError;
use crate::secrets;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};

pub struct NewFederatedAuthorization {
    pub rel_type: FederatedRelType,
    pub provider_id: String,
    pub tenant_id: String,
    pub code_verifier: Option<String>,
    pub init_client_id: String,
    pub init_redirect_uri: String,
    pub init_scope: String,
    pub init_state: Option<String>,
    pub init_code_challenge: Option<String>,
    pub init_code_challenge_method: Option<String>,
    pub ttl_ms: i64,
}

/// Persist the correlation state for an outbound round trip. The clear state
/// token is returned once; only its hash is stored.
pub async fn begin(
    db: &DatabaseConnection,
    input: NewFederatedAuthorization,
) -> Result<String, GatehouseError> {
    let state = secrets::random_secret();
    let now = secrets::now_ms();

    let row = entities::federated_authorization::ActiveModel {
        state_hash: Set(secrets::hash_secret(&state)),
        rel_type: Set(input.rel_type),
        provider_id: Set(input.provider_id),
        tenant_id: Set(input.tenant_id),
        code_verifier: Set(input.code_verifier),
        init_client_id: Set(input.init_client_id),
        init_redirect_uri: Set(input.init_redirect_uri),
        init_scope: Set(input.init_scope),
        init_state: Set(input.init_state),
        init_code_challenge: Set(input.init_code_challenge),
        init_code_challenge_method: Set(input.init_code_challenge_method),
        created_at: Set(now),
        expires_at: Set(now + input.ttl_ms),
    };

    row.insert(db).await?;
    Ok(state)
}

/// Single-use consume of the correlation state: fetch, then conditional delete.
/// Of concurrent callbacks for the same state exactly one gets the row.
pub async fn consume_state(
    db: &DatabaseConnection,
    state: &str,
) -> Result<Option<entities::federated_authorization::Model>, GatehouseError> {
    use entities::federated_authorization::{Column, Entity};

    let hash = secrets::hash_secret(state);
    let now = secrets::now_ms();

    let Some(model) = Entity::find_by_id(&hash).one(db).await? else {
        return Ok(None);
    };

    if model.expires_at <= now {
        return Ok(None);
    }

    let deleted = Entity::delete_many()
        .filter(Column::StateHash.eq(&hash))
        .exec(db)
        .await?;

    if deleted.rows_affected != 1 {
        return Ok(None);
    }

    Ok(Some(model))
}

pub async fn cleanup_expired(db: &DatabaseConnection) -> Result<u64, GatehouseError> {
    use entities::federated_authorization::{Column, Entity};

    let now = secrets::now_ms();
    let result = Entity::delete_many()
        .filter(Column::ExpiresAt.lt(now))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}

// Provider configuration, managed by the admin surface.

pub async fn put_provider(
    db: &DatabaseConnection,
    model: entities::federated_provider::Model,
) -> Result<(), GatehouseError> {
    use entities::federated_provider::{ActiveModel, Column, Entity};

    let active = ActiveModel {
        provider_id: Set(model.provider_id),
        tenant_id: Set(model.tenant_id),
        issuer: Set(model.issuer),
        client_id: Set(model.client_id),
        client_secret: Set(model.client_secret),
        authorize_endpoint: Set(model.authorize_endpoint),
        token_endpoint: Set(model.token_endpoint),
        userinfo_endpoint: Set(model.userinfo_endpoint),
        scopes: Set(model.scopes),
        use_pkce: Set(model.use_pkce),
        enabled: Set(model.enabled),
    };

    Entity::insert(active)
        .on_conflict(
            OnConflict::column(Column::ProviderId)
                .update_columns([
                    Column::TenantId,
                    Column::Issuer,
                    Column::ClientId,
                    Column::ClientSecret,
                    Column::AuthorizeEndpoint,
                    Column::TokenEndpoint,
                    Column::UserinfoEndpoint,
                    Column::Scopes,
                    Column::UsePkce,
                    Column::Enabled,
                ])
                .to_owned(),
        )
        .exec(db)
        .await?;

    Ok(())
}

pub async fn get_provider(
    db: &DatabaseConnection,
    provider_id: &str,
) -> Result<Option<entities::federated_provider::Model>, GatehouseError> {
    Ok(entities::FederatedProvider::find_by_id(provider_id)
        .one(db)
        .await?)
}

pub async fn list_providers(
    db: &DatabaseConnection,
    tenant_id: &str,
) -> Result<Vec<entities::federated_provider::Model>, GatehouseError> {
    use entities::federated_provider::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::TenantId.eq(tenant_id))
        .all(db)
        .await?)
}

pub async fn delete_provider(
    db: &DatabaseConnection,
    provider_id: &str,
) -> Result<(), GatehouseError> {
    use entities::federated_provider::{Column, Entity};

    Entity::delete_many()
        .filter(Column::ProviderId.eq(provider_id))
        .exec(db)
        .await?;

    Ok(())
}
