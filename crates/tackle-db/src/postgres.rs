//! PostgreSQL graph store.
//!
//! Vertices and edges live in `graph_vertex` / `graph_edge` with JSONB
//! property bags. Each [`GraphTx`] wraps one database transaction.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row, Transaction};
use tracing::trace;

use tackle_core::{
    Edge, EdgeFilter, ElementId, Error, GraphStore, GraphTx, PropertyMap, Result, Vertex,
    VertexFilter,
};

/// Bind parameter for a generated WHERE clause.
#[derive(Debug, Clone, PartialEq)]
enum QueryParam {
    Text(String),
    Json(JsonValue),
}

/// WHERE clause fragment plus its parameters, numbered from `$1`.
#[derive(Debug, Clone, Default, PartialEq)]
struct FilterClause {
    sql: String,
    params: Vec<QueryParam>,
}

impl FilterClause {
    fn push(&mut self, condition: String) {
        if self.sql.is_empty() {
            self.sql = condition;
        } else {
            self.sql.push_str(" AND ");
            self.sql.push_str(&condition);
        }
    }

    fn next_param(&mut self, param: QueryParam) -> usize {
        self.params.push(param);
        self.params.len()
    }

    fn where_sql(&self) -> String {
        if self.sql.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.sql)
        }
    }

    fn for_vertices(filter: &VertexFilter) -> Self {
        let mut clause = Self::default();
        if let Some(ref tag) = filter.type_tag {
            let n = clause.next_param(QueryParam::Text(tag.clone()));
            clause.push(format!("${}::text = ANY(type_tags)", n));
        }
        if let Some(ref key) = filter.has_property {
            let n = clause.next_param(QueryParam::Text(key.clone()));
            clause.push(format!("properties ? ${}::text", n));
        }
        for (key, value) in &filter.equals {
            let k = clause.next_param(QueryParam::Text(key.clone()));
            let v = clause.next_param(QueryParam::Json(value.clone()));
            clause.push(format!("properties -> ${}::text = ${}::jsonb", k, v));
        }
        clause
    }

    fn for_edges(filter: &EdgeFilter) -> Self {
        let mut clause = Self::default();
        if let Some(ref label) = filter.label {
            let n = clause.next_param(QueryParam::Text(label.clone()));
            clause.push(format!("label = ${}", n));
        }
        for (key, value) in &filter.equals {
            let k = clause.next_param(QueryParam::Text(key.clone()));
            let v = clause.next_param(QueryParam::Json(value.clone()));
            clause.push(format!("properties -> ${}::text = ${}::jsonb", k, v));
        }
        clause
    }
}

fn bind_params<'q>(
    mut query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    params: &'q [QueryParam],
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    for param in params {
        query = match param {
            QueryParam::Text(s) => query.bind(s),
            QueryParam::Json(v) => query.bind(v),
        };
    }
    query
}

fn to_json(properties: &PropertyMap) -> Result<JsonValue> {
    Ok(serde_json::to_value(properties)?)
}

fn from_json(value: JsonValue) -> PropertyMap {
    match value {
        JsonValue::Object(map) => map.into_iter().collect(),
        _ => PropertyMap::new(),
    }
}

fn parse_vertex_row(row: PgRow) -> Vertex {
    Vertex {
        id: row.get("id"),
        type_tags: row.get("type_tags"),
        properties: from_json(row.get("properties")),
    }
}

fn parse_edge_row(row: PgRow) -> Edge {
    Edge {
        id: row.get("id"),
        label: row.get("label"),
        out_vertex: row.get("out_vertex"),
        in_vertex: row.get("in_vertex"),
        properties: from_json(row.get("properties")),
    }
}

const VERTEX_COLUMNS: &str = "id, type_tags, properties";
const EDGE_COLUMNS: &str = "id, label, out_vertex, in_vertex, properties";

/// PostgreSQL implementation of [`GraphStore`].
#[derive(Debug, Clone)]
pub struct PgGraphStore {
    pool: Pool<Postgres>,
}

impl PgGraphStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GraphStore for PgGraphStore {
    async fn begin(&self) -> Result<Box<dyn GraphTx>> {
        let tx = self.pool.begin().await.map_err(Error::Database)?;
        Ok(Box::new(PgGraphTx { tx }))
    }
}

/// One database transaction over the graph tables.
pub struct PgGraphTx {
    tx: Transaction<'static, Postgres>,
}

impl PgGraphTx {
    async fn adjacent_edges(
        &mut self,
        column: &str,
        vertex: ElementId,
        labels: &[&str],
    ) -> Result<Vec<Edge>> {
        let labels: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
        let sql = format!(
            "SELECT {EDGE_COLUMNS} FROM graph_edge
             WHERE {column} = $1 AND (cardinality($2::text[]) = 0 OR label = ANY($2))
             ORDER BY id"
        );
        let rows = sqlx::query(&sql)
            .bind(vertex)
            .bind(&labels)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(Error::Database)?;
        Ok(rows.into_iter().map(parse_edge_row).collect())
    }

    async fn update_properties(
        &mut self,
        table: &str,
        id: ElementId,
        set_sql: &str,
        key: &str,
        value: Option<JsonValue>,
    ) -> Result<()> {
        let sql = format!("UPDATE {table} SET properties = {set_sql} WHERE id = $1");
        let mut query = sqlx::query(&sql).bind(id).bind(key);
        if let Some(value) = value {
            query = query.bind(value);
        }
        let result = query
            .execute(&mut *self.tx)
            .await
            .map_err(Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("{} {}", table, id)));
        }
        Ok(())
    }
}

#[async_trait]
impl GraphTx for PgGraphTx {
    async fn add_vertex(
        &mut self,
        type_tags: Vec<String>,
        properties: PropertyMap,
    ) -> Result<ElementId> {
        let id: ElementId = sqlx::query_scalar(
            "INSERT INTO graph_vertex (type_tags, properties) VALUES ($1, $2) RETURNING id",
        )
        .bind(&type_tags)
        .bind(to_json(&properties)?)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(Error::Database)?;
        trace!(vertex_id = id, "Inserted vertex");
        Ok(id)
    }

    async fn add_edge(
        &mut self,
        label: &str,
        out_vertex: ElementId,
        in_vertex: ElementId,
        properties: PropertyMap,
    ) -> Result<ElementId> {
        let id: Option<ElementId> = sqlx::query_scalar(
            "INSERT INTO graph_edge (label, out_vertex, in_vertex, properties)
             SELECT $1, $2, $3, $4
             WHERE EXISTS (SELECT 1 FROM graph_vertex WHERE id = $2)
               AND EXISTS (SELECT 1 FROM graph_vertex WHERE id = $3)
             RETURNING id",
        )
        .bind(label)
        .bind(out_vertex)
        .bind(in_vertex)
        .bind(to_json(&properties)?)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(Error::Database)?;
        id.ok_or_else(|| {
            Error::NotFound(format!(
                "Edge endpoints {} -> {} do not exist",
                out_vertex, in_vertex
            ))
        })
    }

    async fn vertex(&mut self, id: ElementId) -> Result<Option<Vertex>> {
        let sql = format!("SELECT {VERTEX_COLUMNS} FROM graph_vertex WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(Error::Database)?;
        Ok(row.map(parse_vertex_row))
    }

    async fn find_vertices(&mut self, filter: &VertexFilter) -> Result<Vec<Vertex>> {
        let clause = FilterClause::for_vertices(filter);
        let sql = format!(
            "SELECT {VERTEX_COLUMNS} FROM graph_vertex{} ORDER BY id",
            clause.where_sql()
        );
        let rows = bind_params(sqlx::query(&sql), &clause.params)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(Error::Database)?;
        Ok(rows.into_iter().map(parse_vertex_row).collect())
    }

    async fn count_vertices(&mut self, filter: &VertexFilter) -> Result<u64> {
        let clause = FilterClause::for_vertices(filter);
        let sql = format!("SELECT COUNT(*) FROM graph_vertex{}", clause.where_sql());
        let row = bind_params(sqlx::query(&sql), &clause.params)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(Error::Database)?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as u64)
    }

    async fn find_edges(&mut self, filter: &EdgeFilter) -> Result<Vec<Edge>> {
        let clause = FilterClause::for_edges(filter);
        let sql = format!(
            "SELECT {EDGE_COLUMNS} FROM graph_edge{} ORDER BY id",
            clause.where_sql()
        );
        let rows = bind_params(sqlx::query(&sql), &clause.params)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(Error::Database)?;
        Ok(rows.into_iter().map(parse_edge_row).collect())
    }

    async fn count_edges(&mut self, filter: &EdgeFilter) -> Result<u64> {
        let clause = FilterClause::for_edges(filter);
        let sql = format!("SELECT COUNT(*) FROM graph_edge{}", clause.where_sql());
        let row = bind_params(sqlx::query(&sql), &clause.params)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(Error::Database)?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as u64)
    }

    async fn out_edges(&mut self, vertex: ElementId, labels: &[&str]) -> Result<Vec<Edge>> {
        self.adjacent_edges("out_vertex", vertex, labels).await
    }

    async fn in_edges(&mut self, vertex: ElementId, labels: &[&str]) -> Result<Vec<Edge>> {
        self.adjacent_edges("in_vertex", vertex, labels).await
    }

    async fn set_vertex_property(
        &mut self,
        id: ElementId,
        key: &str,
        value: JsonValue,
    ) -> Result<()> {
        self.update_properties(
            "graph_vertex",
            id,
            "properties || jsonb_build_object($2::text, $3::jsonb)",
            key,
            Some(value),
        )
        .await
    }

    async fn remove_vertex_property(&mut self, id: ElementId, key: &str) -> Result<()> {
        self.update_properties("graph_vertex", id, "properties - $2::text", key, None)
            .await
    }

    async fn remove_edge_property(&mut self, id: ElementId, key: &str) -> Result<()> {
        self.update_properties("graph_edge", id, "properties - $2::text", key, None)
            .await
    }

    async fn drop_vertices(&mut self, filter: &VertexFilter) -> Result<u64> {
        // Incident edges go with ON DELETE CASCADE.
        let clause = FilterClause::for_vertices(filter);
        let sql = format!("DELETE FROM graph_vertex{}", clause.where_sql());
        let result = bind_params(sqlx::query(&sql), &clause.params)
            .execute(&mut *self.tx)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    async fn drop_edges(&mut self, filter: &EdgeFilter) -> Result<u64> {
        let clause = FilterClause::for_edges(filter);
        let sql = format!("DELETE FROM graph_edge{}", clause.where_sql());
        let result = bind_params(sqlx::query(&sql), &clause.params)
            .execute(&mut *self.tx)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    async fn drop_edge(&mut self, id: ElementId) -> Result<()> {
        let result = sqlx::query("DELETE FROM graph_edge WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Edge {}", id)));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(Error::Database)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(Error::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_vertex_filter_clause_all() {
        let clause = FilterClause::for_vertices(&VertexFilter::all());
        assert_eq!(clause.where_sql(), "");
        assert!(clause.params.is_empty());
    }

    #[test]
    fn test_vertex_filter_clause_numbering() {
        let filter = VertexFilter::of_type("EffortReportModel")
            .having("EffortReportModelEffort")
            .with_property("analysisId", "42");
        let clause = FilterClause::for_vertices(&filter);
        assert_eq!(
            clause.where_sql(),
            " WHERE $1::text = ANY(type_tags) AND properties ? $2::text AND properties -> $3::text = $4::jsonb"
        );
        assert_eq!(
            clause.params,
            vec![
                QueryParam::Text("EffortReportModel".into()),
                QueryParam::Text("EffortReportModelEffort".into()),
                QueryParam::Text("analysisId".into()),
                QueryParam::Json(json!("42")),
            ]
        );
    }

    #[test]
    fn test_edge_filter_clause() {
        let filter = EdgeFilter::labelled("uses").with_property("analysisId", "7");
        let clause = FilterClause::for_edges(&filter);
        assert_eq!(
            clause.where_sql(),
            " WHERE label = $1 AND properties -> $2::text = $3::jsonb"
        );
        assert_eq!(clause.params.len(), 3);
    }

    #[test]
    fn test_from_json_non_object_is_empty() {
        assert!(from_json(json!([1, 2])).is_empty());
        let props = from_json(json!({"a": 1}));
        assert_eq!(props.get("a"), Some(&json!(1)));
    }
}
