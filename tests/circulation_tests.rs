//! Physical lending against the in-memory store

mod common;

use chrono::Duration;
use elidune_circulation::{
    repository::{LoanStore, ResourceStore},
    AppError,
};
use tokio_test::{assert_err, assert_ok};

use common::harness;

#[tokio::test]
async fn test_borrow_then_return_restores_copies() {
    let h = harness();
    let book = h.store.add_resource("Dune", 2, false).await;
    let paul = h.store.add_reader("Paul", None).await;

    let loan = assert_ok!(h.services.circulation.borrow_resource(book.id, paul.id).await);
    assert!(loan.is_active());
    assert_eq!(ResourceStore::get_by_id(&h.store, book.id).await.unwrap().available_copies, 1);

    h.clock.advance(Duration::days(3));
    let returned = assert_ok!(h.services.circulation.return_resource(book.id, paul.id).await);
    assert_eq!(returned.id, loan.id);
    assert_eq!(returned.returned_at, Some(h.clock_now()));
    assert_eq!(ResourceStore::get_by_id(&h.store, book.id).await.unwrap().available_copies, 2);
}

#[tokio::test]
async fn test_fourth_loan_exceeds_quota() {
    let h = harness();
    let paul = h.store.add_reader("Paul", None).await;
    for title in ["Dune", "Dune Messiah", "Children of Dune"] {
        let book = h.store.add_resource(title, 1, false).await;
        assert_ok!(h.services.circulation.borrow_resource(book.id, paul.id).await);
    }

    let fourth = h.store.add_resource("God Emperor of Dune", 1, false).await;
    let err = assert_err!(h.services.circulation.borrow_resource(fourth.id, paul.id).await);
    assert!(matches!(err, AppError::QuotaExceeded(_)));
    assert_eq!(ResourceStore::get_by_id(&h.store, fourth.id).await.unwrap().available_copies, 1);
    assert_eq!(h.store.count_active_by_reader(paul.id).await.unwrap(), 3);
}

#[tokio::test]
async fn test_same_pair_cannot_borrow_twice() {
    let h = harness();
    let book = h.store.add_resource("Dune", 3, false).await;
    let paul = h.store.add_reader("Paul", None).await;

    assert_ok!(h.services.circulation.borrow_resource(book.id, paul.id).await);
    let err = assert_err!(h.services.circulation.borrow_resource(book.id, paul.id).await);
    assert!(matches!(err, AppError::Conflict(_)));

    let loans = h.services.circulation.get_active_loans_for_reader(paul.id).await.unwrap();
    assert_eq!(loans.len(), 1);
    assert_eq!(ResourceStore::get_by_id(&h.store, book.id).await.unwrap().available_copies, 2);
}

#[tokio::test]
async fn test_exhausted_resource() {
    let h = harness();
    let book = h.store.add_resource("Dune", 0, false).await;
    let paul = h.store.add_reader("Paul", None).await;

    let err = assert_err!(h.services.circulation.borrow_resource(book.id, paul.id).await);
    assert!(matches!(err, AppError::Exhausted(_)));
    assert_eq!(ResourceStore::get_by_id(&h.store, book.id).await.unwrap().available_copies, 0);
}

#[tokio::test]
async fn test_return_twice_fails_without_touching_copies() {
    let h = harness();
    let book = h.store.add_resource("Dune", 1, false).await;
    let paul = h.store.add_reader("Paul", None).await;

    assert_ok!(h.services.circulation.borrow_resource(book.id, paul.id).await);
    assert_ok!(h.services.circulation.return_resource(book.id, paul.id).await);

    let err = assert_err!(h.services.circulation.return_resource(book.id, paul.id).await);
    assert!(err.is_not_found());
    assert_eq!(ResourceStore::get_by_id(&h.store, book.id).await.unwrap().available_copies, 1);
}

#[tokio::test]
async fn test_archived_resource_is_not_found() {
    let h = harness();
    let book = h.store.add_resource("Dune", 1, false).await;
    let paul = h.store.add_reader("Paul", None).await;
    h.store.archive_resource(book.id, h.clock_now()).await;

    let err = assert_err!(h.services.circulation.borrow_resource(book.id, paul.id).await);
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_archived_reader_is_not_found() {
    let h = harness();
    let paul = h.store.add_reader("Paul", None).await;
    h.store.archive_reader(paul.id, h.clock_now()).await;

    let err = assert_err!(h.services.circulation.get_active_loans_for_reader(paul.id).await);
    assert!(err.is_not_found());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_race_for_last_copy() {
    let h = harness();
    let book = h.store.add_resource("Dune", 1, false).await;
    let paul = h.store.add_reader("Paul", None).await;
    let jessica = h.store.add_reader("Jessica", None).await;

    let first = {
        let circulation = h.services.circulation.clone();
        tokio::spawn(async move { circulation.borrow_resource(book.id, paul.id).await })
    };
    let second = {
        let circulation = h.services.circulation.clone();
        tokio::spawn(async move { circulation.borrow_resource(book.id, jessica.id).await })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(AppError::Exhausted(_))))
            .count(),
        1
    );
    assert_eq!(ResourceStore::get_by_id(&h.store, book.id).await.unwrap().available_copies, 0);

    let holders = h.store.count_active_by_reader(paul.id).await.unwrap()
        + h.store.count_active_by_reader(jessica.id).await.unwrap();
    assert_eq!(holders, 1);
}
