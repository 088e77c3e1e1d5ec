use std::sync::Arc;

use futures::future::join_all;
use rankwatch::store::{ResultStore, SqliteResultStore};
use tempfile::tempdir;

#[tokio::test]
async fn get_or_create_model_is_idempotent_under_races() {
    let dir = tempdir().unwrap();
    let store = Arc::new(SqliteResultStore::new(dir.path().join("rw.sqlite")).unwrap());

    let first = store.get_or_create_model("gpt-4o-mini", "openai").await.unwrap();
    let second = store.get_or_create_model("gpt-4o-mini", "openai").await.unwrap();
    assert_eq!(first, second);

    let racers = (0..8).map(|_| {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .get_or_create_model("claude-3-5-haiku-latest", "claude")
                .await
        })
    });
    let ids: Vec<i64> = join_all(racers)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();
    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    assert_ne!(ids[0], first);
}

#[tokio::test]
async fn get_or_create_model_overwrites_provider_label() {
    let dir = tempdir().unwrap();
    let store = SqliteResultStore::new(dir.path().join("rw.sqlite")).unwrap();

    let id = store.get_or_create_model("shared-model", "openai").await.unwrap();
    let again = store.get_or_create_model("shared-model", "gemini").await.unwrap();
    assert_eq!(id, again);

    let model = store.find_model("shared-model").await.unwrap().unwrap();
    assert_eq!(model.provider_label, "gemini");
}

#[tokio::test]
async fn appends_accumulate_and_latest_is_newest() {
    let dir = tempdir().unwrap();
    let store = SqliteResultStore::new(dir.path().join("rw.sqlite")).unwrap();

    let company = store.insert_company("Acme Corp", "acme.com").await.unwrap();
    let question = store
        .replace_questions(company.id, vec!["best crm?".into()])
        .await
        .unwrap()
        .remove(0);
    let model = store.get_or_create_model("gpt-4o-mini", "openai").await.unwrap();

    let ranks = [Some(3), None, Some(2), Some(1), None];
    let mut last = None;
    for rank in ranks {
        last = Some(store.append_rank(question.id, model, rank).await.unwrap());
    }

    assert_eq!(store.count_records_for(question.id, model).await.unwrap(), 5);

    let latest = store.latest_for(question.id, model).await.unwrap().unwrap();
    assert_eq!(Some(latest.id), last.map(|r| r.id));
    assert_eq!(latest.rank, None);

    let history = store.history_for(question.id, model).await.unwrap();
    let history_ranks: Vec<Option<i64>> = history.iter().map(|r| r.rank).collect();
    assert_eq!(history_ranks, vec![None, Some(1), Some(2), None, Some(3)]);
    assert!(history.windows(2).all(|w| w[0].observed_at >= w[1].observed_at));
}

#[tokio::test]
async fn replace_questions_cascades_old_rank_records() {
    let dir = tempdir().unwrap();
    let store = SqliteResultStore::new(dir.path().join("rw.sqlite")).unwrap();

    let company = store.insert_company("Acme Corp", "acme.com").await.unwrap();
    let old = store
        .replace_questions(
            company.id,
            vec!["q one".into(), "q two".into(), "q three".into()],
        )
        .await
        .unwrap();
    let model = store.get_or_create_model("gemini-1.5-pro", "gemini").await.unwrap();
    for q in &old {
        store.append_rank(q.id, model, Some(1)).await.unwrap();
        store.append_rank(q.id, model, None).await.unwrap();
    }

    let new = store
        .replace_questions(company.id, vec!["new one".into(), "new two".into()])
        .await
        .unwrap();

    let current = store.questions_for(company.id).await.unwrap();
    assert_eq!(current, new);
    assert_eq!(current.len(), 2);
    for q in &old {
        assert_eq!(store.count_records_for(q.id, model).await.unwrap(), 0);
        assert!(store.latest_for(q.id, model).await.unwrap().is_none());
    }
    // The model row itself survives.
    assert!(store.find_model("gemini-1.5-pro").await.unwrap().is_some());
}

#[tokio::test]
async fn delete_company_cascades_questions_and_records() {
    let dir = tempdir().unwrap();
    let store = SqliteResultStore::new(dir.path().join("rw.sqlite")).unwrap();

    let acme = store.insert_company("Acme Corp", "acme.com").await.unwrap();
    let beta = store.insert_company("Beta Inc", "beta.io").await.unwrap();
    let acme_q = store.replace_questions(acme.id, vec!["a".into()]).await.unwrap()[0].id;
    let beta_q = store.replace_questions(beta.id, vec!["b".into()]).await.unwrap()[0].id;
    let model = store.get_or_create_model("gpt-3.5-turbo", "openai").await.unwrap();
    store.append_rank(acme_q, model, Some(2)).await.unwrap();
    store.append_rank(beta_q, model, Some(5)).await.unwrap();

    store.delete_company(acme.id).await.unwrap();

    assert!(store.questions_for(acme.id).await.unwrap().is_empty());
    assert_eq!(store.count_records_for(acme_q, model).await.unwrap(), 0);
    assert_eq!(store.count_records_for(beta_q, model).await.unwrap(), 1);
    assert_eq!(store.list_companies().await.unwrap(), vec![beta]);
}

#[tokio::test]
async fn append_for_unknown_question_fails() {
    let dir = tempdir().unwrap();
    let store = SqliteResultStore::new(dir.path().join("rw.sqlite")).unwrap();
    let model = store.get_or_create_model("gpt-4o-mini", "openai").await.unwrap();

    assert!(store.append_rank(999, model, Some(1)).await.is_err());
}

#[tokio::test]
async fn store_reopens_with_existing_data() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("rw.sqlite");
    {
        let store = SqliteResultStore::new(&path).unwrap();
        store.insert_company("Acme Corp", "acme.com").await.unwrap();
    }
    let store = SqliteResultStore::new(&path).unwrap();
    assert_eq!(store.path(), path.as_path());
    assert_eq!(store.list_companies().await.unwrap().len(), 1);
}
