//! Walks the cursor-based playlist listing page by page

use futures::stream::{self, Stream};

use crate::auth::Credential;
use crate::model::{ApiFailure, CatalogApi, ListingPage};
use super::executor::RequestExecutor;

enum Cursor {
    First,
    Next(String),
    Exhausted,
}

/// Streams listing pages as they arrive.
///
/// Throttling is absorbed by the executor. Any other failure is yielded once and ends
/// the stream; the listing is never resumed from the middle.
pub struct PaginatedCollector<'a, A: ?Sized> {
    api: &'a A,
    executor: &'a RequestExecutor,
    credential: &'a Credential,
}

impl<'a, A: CatalogApi + ?Sized> PaginatedCollector<'a, A> {
    pub fn new(api: &'a A, executor: &'a RequestExecutor, credential: &'a Credential) -> Self {
        Self {
            api,
            executor,
            credential,
        }
    }

    pub fn pages(self) -> impl Stream<Item = Result<ListingPage, ApiFailure>> + 'a {
        let Self {
            api,
            executor,
            credential,
        } = self;
        stream::try_unfold(Cursor::First, move |cursor| {
            fetch_page(api, executor, credential, cursor)
        })
    }
}

async fn fetch_page<A: CatalogApi + ?Sized>(
    api: &A,
    executor: &RequestExecutor,
    credential: &Credential,
    cursor: Cursor,
) -> Result<Option<(ListingPage, Cursor)>, ApiFailure> {
    let locator = match cursor {
        Cursor::First => None,
        Cursor::Next(next) => Some(next),
        Cursor::Exhausted => return Ok(None),
    };

    let page = executor
        .execute("list_page", || api.list_page(credential, locator.clone()))
        .await?;

    tracing::debug!(
        offset = page.offset,
        count = page.items.len(),
        total = ?page.total,
        has_next = page.next.is_some(),
        "Listing page received"
    );

    let next = match &page.next {
        Some(next) => Cursor::Next(next.clone()),
        None => Cursor::Exhausted,
    };
    Ok(Some((page, next)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContainerDescriptor, MockCatalogApi};
    use futures::{StreamExt, TryStreamExt};
    use mockall::predicate::eq;
    use mockall::Sequence;
    use std::time::Duration;

    fn descriptor(id: &str) -> ContainerDescriptor {
        ContainerDescriptor {
            id: id.into(),
            version_id: "v1".into(),
            name: id.into(),
            owner_id: "me".into(),
            contents_uri: String::new(),
            external_uri: String::new(),
        }
    }

    #[tokio::test]
    async fn follows_next_locators_until_exhausted() {
        let mut api = MockCatalogApi::new();
        let mut seq = Sequence::new();
        api.expect_list_page()
            .with(mockall::predicate::always(), eq(None::<String>))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Ok(ListingPage {
                    total: Some(3),
                    offset: 0,
                    items: vec![Some(descriptor("a")), Some(descriptor("b"))],
                    next: Some("page-2".into()),
                })
            });
        api.expect_list_page()
            .with(mockall::predicate::always(), eq(Some("page-2".to_string())))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Ok(ListingPage {
                    total: Some(3),
                    offset: 2,
                    items: vec![Some(descriptor("c"))],
                    next: None,
                })
            });

        let executor = RequestExecutor::new(Duration::ZERO);
        let credential = Credential::new("token");
        let pages: Vec<ListingPage> = PaginatedCollector::new(&api, &executor, &credential)
            .pages()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1].offset, 2);
    }

    #[tokio::test]
    async fn throttled_pages_are_resent_with_the_same_cursor() {
        let mut api = MockCatalogApi::new();
        let mut first_attempts = 0;
        api.expect_list_page()
            .with(mockall::predicate::always(), eq(None::<String>))
            .times(3)
            .returning(move |_, _| {
                first_attempts += 1;
                if first_attempts <= 2 {
                    Err(ApiFailure::Throttled { retry_after: None })
                } else {
                    Ok(ListingPage {
                        total: Some(2),
                        offset: 0,
                        items: vec![Some(descriptor("a"))],
                        next: Some("page-2".into()),
                    })
                }
            });
        let mut second_attempts = 0;
        api.expect_list_page()
            .with(mockall::predicate::always(), eq(Some("page-2".to_string())))
            .times(2)
            .returning(move |_, _| {
                second_attempts += 1;
                if second_attempts == 1 {
                    Err(ApiFailure::Throttled { retry_after: Some(Duration::ZERO) })
                } else {
                    Ok(ListingPage {
                        total: Some(2),
                        offset: 1,
                        items: vec![Some(descriptor("b"))],
                        next: None,
                    })
                }
            });

        let executor = RequestExecutor::new(Duration::ZERO);
        let credential = Credential::new("token");
        let results: Vec<Result<ListingPage, ApiFailure>> =
            PaginatedCollector::new(&api, &executor, &credential)
                .pages()
                .collect()
                .await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(results[1].as_ref().unwrap().offset, 1);
    }

    #[tokio::test]
    async fn failure_ends_the_stream() {
        let mut api = MockCatalogApi::new();
        let mut seq = Sequence::new();
        api.expect_list_page()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Ok(ListingPage {
                    total: Some(4),
                    offset: 0,
                    items: vec![Some(descriptor("a")), Some(descriptor("b"))],
                    next: Some("page-2".into()),
                })
            });
        api.expect_list_page()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(ApiFailure::Other { status: 500, body: "oops".into() }));

        let executor = RequestExecutor::new(Duration::ZERO);
        let credential = Credential::new("token");
        let mut pages = std::pin::pin!(PaginatedCollector::new(&api, &executor, &credential).pages());

        assert!(pages.try_next().await.unwrap().is_some());
        assert!(pages.try_next().await.is_err());
        assert!(pages.try_next().await.unwrap().is_none());
    }
}
