use sea_orm::{ConnectionTrait, DbErr, Paginator, SelectorTrait};
use serde::{Deserialize, Serialize};

const DEFAULT_PER_PAGE: u64 = 20;
const MAX_PER_PAGE: u64 = 100;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ListQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl ListQuery {
    /// One-based page and a clamped page size.
    pub fn normalize(&self) -> (u64, u64) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self
            .per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE);
        (page, per_page)
    }
}

#[derive(Debug, Serialize)]
pub struct Pagination<T> {
    pub page: u64,
    pub per_page: u64,
    pub total_items: u64,
    pub total_pages: u64,
    pub has_prev: bool,
    pub has_next: bool,
    pub items: Vec<T>,
}

pub async fn paginate<'db, C, S>(
    paginator: Paginator<'db, C, S>,
    query: &ListQuery,
) -> Result<Pagination<S::Item>, DbErr>
where
    C: ConnectionTrait,
    S: SelectorTrait + 'db,
{
    let (page, per_page) = query.normalize();
    let counts = paginator.num_items_and_pages().await?;
    let items = paginator.fetch_page(page - 1).await?;
    Ok(Pagination {
        page,
        per_page,
        total_items: counts.number_of_items,
        total_pages: counts.number_of_pages,
        has_prev: page > 1,
        has_next: page < counts.number_of_pages,
        items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_clamps() {
        assert_eq!(ListQuery::default().normalize(), (1, 20));
        let query = ListQuery {
            page: Some(0),
            per_page: Some(1000),
        };
        assert_eq!(query.normalize(), (1, 100));
        let query = ListQuery {
            page: Some(3),
            per_page: Some(0),
        };
        assert_eq!(query.normalize(), (3, 1));
    }
}
