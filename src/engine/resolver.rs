//! Paged discovery of the entities that depend on a set of roots.

use sqlx::{QueryBuilder, Sqlite};

use crate::{
    db::{DbConnection, SQLITE_LIMIT_VARIABLE_NUMBER},
    engine::{
        batch::Keyed,
        cascade::{dependents_prelude, Mutation},
    },
    error::EngineError,
    model::{EntityKind, Id},
};

/// Root ids bound into one dependents query. Leaves room for the cursor and limit binds.
pub const ROOT_WINDOW: usize = SQLITE_LIMIT_VARIABLE_NUMBER - 8;

#[derive(Debug, Clone)]
pub struct DependencyResolver {
    db: DbConnection,
}

impl DependencyResolver {
    pub fn new(db: DbConnection) -> Self {
        DependencyResolver { db }
    }

    /// Every distinct `T` entity affected when the `S` entities in `source_ids` are mutated.
    pub async fn find_dependents<S: Keyed, T: Keyed>(
        &self,
        mutation: Mutation,
        source_ids: &[Id],
        page_size: usize,
    ) -> Result<DependentPages, EngineError> {
        self.find_dependents_of_kind(mutation, S::KIND, T::KIND, source_ids, page_size)
            .await
    }

    #[tracing::instrument(skip(self, source_ids), fields(sources = source_ids.len()))]
    pub async fn find_dependents_of_kind(
        &self,
        mutation: Mutation,
        source: EntityKind,
        target: EntityKind,
        source_ids: &[Id],
        page_size: usize,
    ) -> Result<DependentPages, EngineError> {
        if page_size == 0 {
            return Err(EngineError::InvalidArgument(
                "dependent page size must be positive".to_string(),
            ));
        }
        if source_ids.len() > ROOT_WINDOW {
            return Err(EngineError::InvalidArgument(format!(
                "at most {ROOT_WINDOW} root ids can be resolved at once, got {}",
                source_ids.len()
            )));
        }
        let mut pages = DependentPages {
            db: self.db.clone(),
            prelude: dependents_prelude(mutation, source, target),
            source,
            target,
            source_ids: source_ids.to_vec(),
            page_size,
            total: 0,
            planned: 0,
            issued: 0,
            cursor: None,
        };
        pages.restart().await?;
        Ok(pages)
    }
}

/// A finite, restartable, paged sequence of dependent ids.
///
/// The number of pages is planned from a count taken when the sequence (re)starts. Each page is
/// re-queried against live state with a keyset cursor (`id > last`), so pages may be interleaved
/// with deletion of the ids already returned. An empty page is skipped rather than ending the run:
/// once the planned pages are spent, a recount past the cursor decides whether more pages follow.
#[derive(Debug)]
pub struct DependentPages {
    db: DbConnection,
    prelude: String,
    source: EntityKind,
    target: EntityKind,
    source_ids: Vec<Id>,
    page_size: usize,
    total: usize,
    planned: usize,
    issued: usize,
    cursor: Option<Id>,
}

impl DependentPages {
    pub fn target(&self) -> EntityKind {
        self.target
    }

    /// Dependents counted when the sequence last (re)started.
    pub fn count(&self) -> usize {
        self.total
    }

    pub fn planned_pages(&self) -> usize {
        self.planned
    }

    fn query(&self, select: &str) -> QueryBuilder<'static, Sqlite> {
        let mut qb = QueryBuilder::<Sqlite>::new("WITH roots(id) AS (VALUES ");
        if self.source_ids.is_empty() {
            qb.push("(NULL)");
        }
        let mut separated = qb.separated(", ");
        for id in &self.source_ids {
            separated.push("(");
            separated.push_bind_unseparated(id.to_string());
            separated.push_unseparated(")");
        }
        qb.push(")").push(self.prelude.as_str()).push(select);
        qb
    }

    async fn count_after(&self, cursor: Option<&Id>) -> Result<usize, EngineError> {
        let mut qb = self.query("SELECT COUNT(*) FROM dependents");
        if let Some(cursor) = cursor {
            qb.push(" WHERE id > ").push_bind(cursor.to_string());
        }
        let sql = qb.sql().to_string();
        let count: i64 = qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.db.0)
            .await
            .map_err(|e| {
                tracing::error!(
                    "[DependencyResolver] SQL error counting {} dependents of {}: '{}'\n\terror: {}",
                    self.target,
                    self.source,
                    sql,
                    e
                );
                e
            })?;
        Ok(count as usize)
    }

    fn pages_for(&self, count: usize) -> usize {
        count.div_ceil(self.page_size)
    }

    /// Re-counts live dependents and re-plans the run from the beginning.
    pub async fn restart(&mut self) -> Result<(), EngineError> {
        self.cursor = None;
        self.issued = 0;
        self.total = self.count_after(None).await?;
        self.planned = self.pages_for(self.total);
        tracing::debug!(
            "[DependencyResolver] {} {} dependent(s) of {} {} root(s), {} page(s) planned",
            self.total,
            self.target,
            self.source_ids.len(),
            self.source,
            self.planned
        );
        Ok(())
    }

    async fn fetch_page(&self) -> Result<Vec<Id>, EngineError> {
        let mut qb = self.query("SELECT id FROM dependents");
        if let Some(cursor) = &self.cursor {
            qb.push(" WHERE id > ").push_bind(cursor.to_string());
        }
        qb.push(" ORDER BY id LIMIT ").push_bind(self.page_size as i64);
        let sql = qb.sql().to_string();
        let rows: Vec<String> = qb
            .build_query_scalar::<String>()
            .fetch_all(&self.db.0)
            .await
            .map_err(|e| {
                tracing::error!(
                    "[DependencyResolver] SQL error paging {} dependents of {}: '{}'\n\terror: {}",
                    self.target,
                    self.source,
                    sql,
                    e
                );
                e
            })?;
        Ok(rows.into_iter().map(Id::from).collect())
    }

    /// The next non-empty page, or `None` once no dependents remain past the cursor.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Id>>, EngineError> {
        let mut recounted = false;
        loop {
            if self.issued >= self.planned {
                if recounted {
                    return Ok(None);
                }
                recounted = true;
                let remaining = self.count_after(self.cursor.as_ref()).await?;
                if remaining == 0 {
                    return Ok(None);
                }
                tracing::debug!(
                    "[DependencyResolver] {} more {} dependent(s) appeared, extending run",
                    remaining,
                    self.target
                );
                self.planned += self.pages_for(remaining);
            }
            self.issued += 1;
            let page = self.fetch_page().await?;
            match page.last() {
                Some(last) => {
                    self.cursor = Some(last.clone());
                    return Ok(Some(page));
                }
                None => {
                    tracing::debug!(
                        "[DependencyResolver] page {} of {} for {} was empty, skipping",
                        self.issued,
                        self.planned,
                        self.target
                    );
                    // Nothing past the cursor right now; spend the plan and let the recount decide.
                    self.issued = self.planned;
                }
            }
        }
    }

    /// Drains the remaining pages into one list.
    pub async fn collect_all(&mut self) -> Result<Vec<Id>, EngineError> {
        let mut ids = Vec::new();
        while let Some(page) = self.next_page().await? {
            ids.extend(page);
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{Network, Node},
        tests::helpers::{delete, insert, network, node, seed_catalog, temp_store},
    };
    use test_log::test;

    async fn networks_on_n1(db: &DbConnection, ids: &[&str]) {
        let networks = ids
            .iter()
            .map(|id| network(id, &["n1"]))
            .collect::<Vec<_>>();
        insert(db, &networks).await;
    }

    async fn seeded() -> (tempfile::TempDir, DbConnection) {
        let (dir, db) = temp_store().await;
        seed_catalog(&db).await;
        insert(&db, &[node("n1"), node("n2")]).await;
        (dir, db)
    }

    #[test(tokio::test)]
    async fn pages_survive_interleaved_deletion() {
        let (_dir, db) = seeded().await;
        let ids = (0..10).map(|i| format!("w{i:02}")).collect::<Vec<_>>();
        networks_on_n1(&db, &ids.iter().map(String::as_str).collect::<Vec<_>>()).await;
        insert(&db, &[network("w-other", &["n2"])]).await;

        let mut pages = DependencyResolver::new(db.clone())
            .find_dependents::<Node, Network>(Mutation::Delete, &[Id::from("n1")], 3)
            .await
            .unwrap();
        assert_eq!(pages.count(), 10);
        assert_eq!(pages.planned_pages(), 4);

        let mut seen = Vec::new();
        while let Some(page) = pages.next_page().await.unwrap() {
            assert!(page.len() <= 3);
            delete(&db, "networks", &page).await;
            seen.extend(page);
        }
        assert_eq!(seen.len(), 10);
        assert_eq!(db.ids(EntityKind::Network).await.unwrap(), vec![Id::from("w-other")]);
    }

    #[test(tokio::test)]
    async fn dependents_added_mid_run_are_not_missed() {
        let (_dir, db) = seeded().await;
        networks_on_n1(&db, &["w1", "w2", "w3", "w4"]).await;

        let mut pages = DependencyResolver::new(db.clone())
            .find_dependents_of_kind(
                Mutation::Delete,
                EntityKind::Node,
                EntityKind::Network,
                &[Id::from("n1")],
                2,
            )
            .await
            .unwrap();
        assert_eq!(pages.planned_pages(), 2);
        let first = pages.next_page().await.unwrap().unwrap();
        assert_eq!(first, vec![Id::from("w1"), Id::from("w2")]);

        networks_on_n1(&db, &["w5", "w6", "w7"]).await;
        let rest = pages.collect_all().await.unwrap();
        assert_eq!(rest.len(), 5);
        assert!(rest.contains(&Id::from("w7")));
    }

    #[test(tokio::test)]
    async fn emptied_view_ends_the_run() {
        let (_dir, db) = seeded().await;
        networks_on_n1(&db, &["w1", "w2", "w3", "w4", "w5", "w6"]).await;

        let mut pages = DependencyResolver::new(db.clone())
            .find_dependents::<Node, Network>(Mutation::Delete, &[Id::from("n1")], 2)
            .await
            .unwrap();
        assert!(pages.next_page().await.unwrap().is_some());
        delete(&db, "networks", &db.ids(EntityKind::Network).await.unwrap()).await;
        assert_eq!(pages.next_page().await.unwrap(), None);

        pages.restart().await.unwrap();
        assert_eq!(pages.count(), 0);
        assert_eq!(pages.next_page().await.unwrap(), None);
    }

    #[test(tokio::test)]
    async fn edits_only_reach_snapshots() {
        let (_dir, db) = seeded().await;
        networks_on_n1(&db, &["w1"]).await;
        let resolver = DependencyResolver::new(db.clone());
        let edges = resolver
            .find_dependents_of_kind(
                Mutation::Edit,
                EntityKind::Node,
                EntityKind::Edge,
                &[Id::from("n1")],
                10,
            )
            .await
            .unwrap();
        assert_eq!(edges.count(), 0);
        let mut networks = resolver
            .find_dependents::<Node, Network>(Mutation::Edit, &[Id::from("n1")], 10)
            .await
            .unwrap();
        assert_eq!(networks.collect_all().await.unwrap(), vec![Id::from("w1")]);
    }

    #[test(tokio::test)]
    async fn rejects_zero_page_size() {
        let (_dir, db) = temp_store().await;
        let result = DependencyResolver::new(db)
            .find_dependents::<Node, Network>(Mutation::Delete, &[Id::from("n1")], 0)
            .await;
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
    }
}
