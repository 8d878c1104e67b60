use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::debug;

use super::{ArgType, RpcCall, RpcTransport};

/// Calls stored procedures over a sqlx pool:
/// `SELECT public.<name>(p_a => $1, p_b => $2)::jsonb`.
#[derive(Clone)]
pub struct PgTransport {
    pool: PgPool,
}

impl PgTransport {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("connect to database")?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// SQL text for a call. Procedure and argument names are static
/// identifiers; values are always bound.
pub(crate) fn call_sql(call: &RpcCall) -> String {
    let args = call
        .args
        .iter()
        .enumerate()
        .map(|(i, arg)| {
            let cast = match arg.ty {
                ArgType::Text => "::text",
                ArgType::Uuid => "::uuid",
            };
            format!("{} => ${}{}", arg.name, i + 1, cast)
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT public.{}({})::jsonb", call.procedure.name(), args)
}

#[async_trait]
impl RpcTransport for PgTransport {
    async fn call(&self, call: &RpcCall) -> anyhow::Result<Value> {
        let sql = call_sql(call);
        let mut query = sqlx::query_scalar::<_, Option<Value>>(&sql);
        for arg in &call.args {
            query = query.bind(arg.value.clone());
        }
        let value = query
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("rpc {}", call.procedure))?;
        debug!(procedure = %call.procedure, "rpc returned");
        value.with_context(|| format!("rpc {} returned null", call.procedure))
    }
}
