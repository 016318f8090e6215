use crate::entities;
use crate::entities::auth_flow::{FlowStep, FlowType, StepStatus};
use crate::errors::GatehouseError;
use crate::secrets;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};

/// Deserialized form of the steps column: the full ordered plan plus the
/// results accumulated so far. The cursor (results.len()) is the index of the
/// single live step, so "exactly one pending step" holds by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSteps {
    pub plan: Vec<String>,
    pub results: Vec<FlowStep>,
}

impl FlowSteps {
    pub fn current_step(&self) -> Option<&str> {
        if self.is_failed() {
            return None;
        }
        self.plan.get(self.results.len()).map(|s| s.as_str())
    }

    pub fn is_complete(&self) -> bool {
        self.results.len() == self.plan.len()
            && self
                .results
                .iter()
                .all(|r| r.status == StepStatus::Completed)
    }

    pub fn is_failed(&self) -> bool {
        self.results
            .last()
            .is_some_and(|r| r.status == StepStatus::Failed)
    }
}

pub enum StepOutcome {
    Completed,
    Failed,
}

pub async fn begin(
    db: &DatabaseConnection,
    tenant_id: &str,
    flow_type: FlowType,
    plan: Vec<String>,
    ttl_ms: i64,
) -> Result<String, GatehouseError> {
    if plan.is_empty() {
        return Err(GatehouseError::BadRequest(
            "flow plan must contain at least one step".to_string(),
        ));
    }

    let token = secrets::random_secret();
    let now = secrets::now_ms();
    let steps = FlowSteps {
        plan,
        results: Vec::new(),
    };

    let row = entities::auth_flow::ActiveModel {
        flow_token_hash: Set(secrets::hash_secret(&token)),
        tenant_id: Set(tenant_id.to_string()),
        flow_type: Set(flow_type),
        user_id: Set(None),
        steps: Set(serde_json::to_string(&steps)?),
        cursor: Set(0),
        created_at: Set(now),
        expires_at: Set(now + ttl_ms),
    };

    row.insert(db).await?;
    Ok(token)
}

pub async fn get(
    db: &DatabaseConnection,
    flow_token: &str,
) -> Result<Option<(entities::auth_flow::Model, FlowSteps)>, GatehouseError> {
    let now = secrets::now_ms();

    let Some(model) = entities::AuthFlow::find_by_id(secrets::hash_secret(flow_token))
        .one(db)
        .await?
    else {
        return Ok(None);
    };

    if model.expires_at <= now {
        return Ok(None);
    }

    let steps: FlowSteps = serde_json::from_str(&model.steps)?;
    Ok(Some((model, steps)))
}

/// Resolve the live step and advance the cursor. The conditional update on the
/// stored cursor arbitrates concurrent advances: the loser gets None and must
/// re-read. A Failed outcome is terminal; the cursor stops moving.
pub async fn advance(
    db: &DatabaseConnection,
    flow_token: &str,
    outcome: StepOutcome,
    user_id: Option<&str>,
) -> Result<Option<FlowSteps>, GatehouseError> {
    use entities::auth_flow::{Column, Entity};

    let Some((model, mut steps)) = get(db, flow_token).await? else {
        return Ok(None);
    };

    if steps.is_failed() || steps.current_step().is_none() {
        return Ok(None);
    }

    let step_name = steps.plan[steps.results.len()].clone();
    let status = match outcome {
        StepOutcome::Completed => StepStatus::Completed,
        StepOutcome::Failed => StepStatus::Failed,
    };
    steps.results.push(FlowStep {
        step: step_name,
        status,
    });

    let mut update = Entity::update_many()
        .col_expr(Column::Steps, Expr::value(serde_json::to_string(&steps)?))
        .col_expr(Column::Cursor, Expr::value(steps.results.len() as i64))
        .filter(Column::FlowTokenHash.eq(&model.flow_token_hash))
        .filter(Column::Cursor.eq(model.cursor));

    if let Some(uid) = user_id {
        update = update.col_expr(Column::UserId, Expr::value(Some(uid.to_string())));
    }

    if update.exec(db).await?.rows_affected != 1 {
        return Ok(None);
    }

    Ok(Some(steps))
}

pub async fn delete(db: &DatabaseConnection, flow_token: &str) -> Result<(), GatehouseError> {
    use entities::auth_flow::{Column, Entity};

    Entity::delete_many()
        .filter(Column::FlowTokenHash.eq(secrets::hash_secret(flow_token)))
        .exec(db)
        .await?;

    Ok(())
}

pub async fn cleanup_expired(db: &DatabaseConnection) -> Result<u64, GatehouseError> {
    use entities::auth_flow::{Column, Entity};

    let now = secrets::now_ms();
    let result = Entity::delete_many()
        .filter(Column::ExpiresAt.lt(now))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}
