//! Write operations against a mock store.
//!
//! Verifies:
//! - connecting builds the project context from the project description
//! - single writes sync the resource and fail fast
//! - batch writes run every item and record each outcome on its own resource
//! - preconditions are checked before any request leaves the client

mod common;

use common::{metadata_payload, path, person, quote, registered_person, BUCKET};
use mockito::{Matcher, Server};
use nexus_store::{ErrorKind, NexusStore, StoreError};
use serde_json::json;

#[test_log::test(tokio::test)]
async fn test_connect_reads_project_context() {
    let mut server = Server::new_async().await;
    let project = server
        .mock("GET", path(&format!("/projects/{BUCKET}")))
        .match_header("authorization", "Bearer token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "base": "http://data.net/",
                "vocab": "http://vocab.net/",
                "apiMappings": [
                    {"prefix": "datashapes", "namespace": "https://neuroshapes.org/dash/"}
                ],
            })
            .to_string(),
        )
        .create_async()
        .await;

    let store = NexusStore::connect(common::config(&server), None)
        .await
        .unwrap();
    project.assert_async().await;
    assert_eq!(store.bucket(), BUCKET);
    assert_eq!(store.context().base(), Some("http://data.net/"));
    assert_eq!(
        store.context().expand("datashapes"),
        Some("https://neuroshapes.org/dash/".to_string())
    );
}

#[test_log::test(tokio::test)]
async fn test_connect_failure_is_a_configuration_error() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", path(&format!("/projects/{BUCKET}")))
        .with_status(401)
        .with_body(json!({"reason": "The supplied authentication is invalid."}).to_string())
        .create_async()
        .await;

    match NexusStore::connect(common::config(&server), None).await {
        Err(StoreError::Configuration(message)) => {
            assert_eq!(message, "the supplied authentication is invalid")
        }
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(_) => panic!("connect should fail"),
    }
}

#[test_log::test(tokio::test)]
async fn test_register_one_assigns_id_and_metadata() {
    let mut server = Server::new_async().await;
    let id = "http://data.net/jane";
    let create = server
        .mock("POST", path(&format!("/resources/{BUCKET}/_")))
        .match_query(Matcher::Any)
        .match_header("content-type", "application/ld+json")
        .match_body(Matcher::PartialJson(json!({"@type": "Person", "name": "Jane"})))
        .with_status(201)
        .with_body(metadata_payload(&server, id, 1).to_string())
        .create_async()
        .await;

    let store = common::store(&server);
    let mut jane = person("Jane");
    store.register(&mut jane, None).await.unwrap();

    create.assert_async().await;
    assert_eq!(jane.id.as_deref(), Some(id));
    assert_eq!(jane.rev(), Some(1));
    assert!(jane.synchronized);
    assert!(jane.context.is_some());
    let action = jane.last_action.unwrap();
    assert_eq!(action.operation, "register");
    assert!(action.succeeded);
}

#[test_log::test(tokio::test)]
async fn test_register_one_failure_is_recorded_and_returned() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", path(&format!("/resources/{BUCKET}/_")))
        .match_query(Matcher::Any)
        .with_status(409)
        .with_body(json!({"@type": "ResourceAlreadyExists"}).to_string())
        .create_async()
        .await;

    let store = common::store(&server);
    let mut jane = person("Jane");
    let error = store.register(&mut jane, None).await.unwrap_err();

    assert_eq!(error.kind(), Some(ErrorKind::Registration));
    assert_eq!(error.message(), "resource already exists");
    assert!(!jane.synchronized);
    assert!(jane.store_metadata.is_none());
    let action = jane.last_action.unwrap();
    assert!(!action.succeeded);
    assert_eq!(action.error, Some(error));
}

#[test_log::test(tokio::test)]
async fn test_register_many_isolates_failures() {
    let mut server = Server::new_async().await;
    let ids = ["http://data.net/a", "http://data.net/b", "http://data.net/c"];
    let mut mocks = Vec::new();
    for id in ids {
        let endpoint = path(&format!("/resources/{BUCKET}/_/{}", quote(id)));
        let mock = if id.ends_with('b') {
            server
                .mock("PUT", endpoint)
                .match_query(Matcher::Any)
                .with_status(500)
                .with_body(json!({"reason": "Internal failure."}).to_string())
        } else {
            server
                .mock("PUT", endpoint)
                .match_query(Matcher::Any)
                .with_status(201)
                .with_body(metadata_payload(&server, id, 1).to_string())
        };
        mocks.push(mock.expect(1).create_async().await);
    }

    let store = common::store(&server);
    let mut people: Vec<_> = ids
        .iter()
        .map(|id| {
            let mut p = person("someone");
            p.id = Some(id.to_string());
            p
        })
        .collect();
    let results = store.register_many(&mut people, None).await.unwrap();

    for mock in mocks {
        mock.assert_async().await;
    }
    assert_eq!(
        results.iter().map(|r| r.index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert!(results[1].response.is_err());
    for (i, resource) in people.iter().enumerate() {
        let action = resource.last_action.as_ref().unwrap();
        assert_eq!(action.operation, "register");
        if i == 1 {
            assert!(!resource.synchronized);
            assert!(!action.succeeded);
            assert_eq!(
                action.error,
                Some(StoreError::Registration("internal failure".to_string()))
            );
        } else {
            assert!(resource.synchronized, "resource {i} should be synchronized");
            assert!(action.succeeded);
            assert_eq!(resource.rev(), Some(1));
        }
    }
}

#[test_log::test(tokio::test)]
async fn test_register_rejects_synchronized_resources_before_sending() {
    let mut server = Server::new_async().await;
    let create = server
        .mock("PUT", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let store = common::store(&server);
    let mut people = vec![
        person("new"),
        registered_person("http://data.net/jane", 1),
    ];
    let error = store.register(&mut people, None).await.unwrap_err();

    create.assert_async().await;
    assert_eq!(
        error,
        StoreError::Registration("register: resource should not be synchronized".to_string())
    );
    assert!(people[0].last_action.is_none());
}

#[test_log::test(tokio::test)]
async fn test_update_sends_current_revision() {
    let mut server = Server::new_async().await;
    let id = "http://data.net/jane";
    let update = server
        .mock("PUT", path(&format!("/resources/{BUCKET}/_/{}", quote(id))))
        .match_query(Matcher::UrlEncoded("rev".into(), "1".into()))
        .match_body(Matcher::PartialJson(json!({"name": "Jane Doe"})))
        .with_status(200)
        .with_body(metadata_payload(&server, id, 2).to_string())
        .create_async()
        .await;

    let store = common::store(&server);
    let mut jane = registered_person(id, 1);
    jane.set("name", "Jane Doe");
    store.update(&mut jane, None).await.unwrap();

    update.assert_async().await;
    assert_eq!(jane.rev(), Some(2));
    assert!(jane.synchronized);
    assert_eq!(jane.last_action.unwrap().operation, "update");
}

#[test_log::test(tokio::test)]
async fn test_update_requires_an_id_and_local_changes() {
    let server = Server::new_async().await;
    let store = common::store(&server);

    let mut anonymous = person("Jane");
    assert_eq!(
        store.update(&mut anonymous, None).await,
        Err(StoreError::Updating(
            "update: resource should have an id".to_string()
        ))
    );

    let mut unchanged = registered_person("http://data.net/jane", 1);
    assert_eq!(
        store.update(&mut unchanged, None).await,
        Err(StoreError::Updating(
            "update: resource should not be synchronized".to_string()
        ))
    );
}

#[test_log::test(tokio::test)]
async fn test_tag_many() {
    let mut server = Server::new_async().await;
    let ids = ["http://data.net/a", "http://data.net/b"];
    let mut mocks = Vec::new();
    for id in ids {
        let mock = server
            .mock(
                "POST",
                path(&format!("/resources/{BUCKET}/_/{}/tags", quote(id))),
            )
            .match_query(Matcher::UrlEncoded("rev".into(), "3".into()))
            .match_body(Matcher::Json(json!({"tag": "v1.0", "rev": 3})))
            .with_status(201)
            .with_body(metadata_payload(&server, id, 4).to_string())
            .create_async()
            .await;
        mocks.push(mock);
    }

    let store = common::store(&server);
    let mut people: Vec<_> = ids.iter().map(|id| registered_person(id, 3)).collect();
    store.tag(&mut people, "v1.0").await.unwrap();

    for mock in mocks {
        mock.assert_async().await;
    }
    for resource in &people {
        assert!(resource.synchronized);
        assert_eq!(resource.rev(), Some(4));
        assert_eq!(resource.last_action.as_ref().unwrap().operation, "tag");
    }
}

#[test_log::test(tokio::test)]
async fn test_tag_requires_synchronized_resource() {
    let server = Server::new_async().await;
    let store = common::store(&server);
    let mut jane = registered_person("http://data.net/jane", 1);
    jane.set("name", "changed");
    assert_eq!(
        store.tag(&mut jane, "v1").await,
        Err(StoreError::Tagging(
            "tag: resource should be synchronized".to_string()
        ))
    );
}

#[test_log::test(tokio::test)]
async fn test_deprecate_one() {
    let mut server = Server::new_async().await;
    let id = "http://data.net/jane";
    let mut payload = metadata_payload(&server, id, 3);
    payload["_deprecated"] = json!(true);
    let deprecate = server
        .mock("DELETE", path(&format!("/resources/{BUCKET}/_/{}", quote(id))))
        .match_query(Matcher::UrlEncoded("rev".into(), "2".into()))
        .with_status(200)
        .with_body(payload.to_string())
        .create_async()
        .await;

    let store = common::store(&server);
    let mut jane = registered_person(id, 2);
    store.deprecate(&mut jane).await.unwrap();

    deprecate.assert_async().await;
    let metadata = jane.store_metadata.as_ref().unwrap();
    assert_eq!(metadata.deprecated, Some(true));
    assert_eq!(metadata.rev, Some(3));
    assert!(jane.synchronized);
}

#[test_log::test(tokio::test)]
async fn test_deprecate_failure_keeps_previous_metadata() {
    let mut server = Server::new_async().await;
    let id = "http://data.net/jane";
    server
        .mock("DELETE", path(&format!("/resources/{BUCKET}/_/{}", quote(id))))
        .match_query(Matcher::Any)
        .with_status(409)
        .with_body(json!({"reason": "Incorrect revision '2' provided, expected '5'."}).to_string())
        .create_async()
        .await;

    let store = common::store(&server);
    let mut jane = registered_person(id, 2);
    let error = store.deprecate(&mut jane).await.unwrap_err();

    assert_eq!(
        error,
        StoreError::Deprecation("incorrect revision '2' provided, expected '5'".to_string())
    );
    assert_eq!(jane.rev(), Some(2));
    assert!(!jane.synchronized);
}

#[test_log::test(tokio::test)]
async fn test_update_many_isolates_failures() {
    let mut server = Server::new_async().await;
    let ids = ["http://data.net/a", "http://data.net/b", "http://data.net/c"];
    let mut mocks = Vec::new();
    for id in ids {
        let endpoint = path(&format!("/resources/{BUCKET}/_/{}", quote(id)));
        let mock = server
            .mock("PUT", endpoint)
            .match_query(Matcher::UrlEncoded("rev".into(), "1".into()));
        let mock = if id.ends_with('a') {
            mock.with_status(500)
                .with_body(json!({"reason": "Internal failure."}).to_string())
        } else {
            mock.with_status(200)
                .with_body(metadata_payload(&server, id, 2).to_string())
        };
        mocks.push(mock.expect(1).create_async().await);
    }

    let store = common::store(&server);
    let mut people: Vec<_> = ids
        .iter()
        .map(|id| {
            let mut p = registered_person(id, 1);
            p.set("name", "renamed");
            p
        })
        .collect();
    let results = store.update_many(&mut people, None).await.unwrap();

    for mock in mocks {
        mock.assert_async().await;
    }
    assert_eq!(results.len(), 3);
    assert_eq!(
        results[0].response,
        Err(StoreError::Updating("internal failure".to_string()))
    );
    assert!(results[1].response.is_ok() && results[2].response.is_ok());

    let failed = &people[0];
    assert!(!failed.synchronized);
    assert_eq!(failed.rev(), Some(1));
    assert!(!failed.last_action.as_ref().unwrap().succeeded);
    for resource in &people[1..] {
        let action = resource.last_action.as_ref().unwrap();
        assert_eq!(action.operation, "update");
        assert!(action.succeeded);
        assert!(resource.synchronized);
        assert_eq!(resource.rev(), Some(2));
    }
}

#[test_log::test(tokio::test)]
async fn test_deprecate_many_isolates_failures() {
    let mut server = Server::new_async().await;
    let ids = ["http://data.net/a", "http://data.net/b"];
    let mut mocks = Vec::new();
    for id in ids {
        let endpoint = path(&format!("/resources/{BUCKET}/_/{}", quote(id)));
        let mock = server
            .mock("DELETE", endpoint)
            .match_query(Matcher::UrlEncoded("rev".into(), "4".into()));
        let mock = if id.ends_with('b') {
            mock.with_status(409).with_body(
                json!({"reason": "Incorrect revision '4' provided, expected '6'."}).to_string(),
            )
        } else {
            let mut payload = metadata_payload(&server, id, 5);
            payload["_deprecated"] = json!(true);
            mock.with_status(200).with_body(payload.to_string())
        };
        mocks.push(mock.expect(1).create_async().await);
    }

    let store = common::store(&server);
    let mut people: Vec<_> = ids.iter().map(|id| registered_person(id, 4)).collect();
    let results = store.deprecate_many(&mut people).await.unwrap();

    for mock in mocks {
        mock.assert_async().await;
    }
    assert_eq!(
        results.iter().map(|r| r.index).collect::<Vec<_>>(),
        vec![0, 1]
    );

    let deprecated = &people[0];
    assert!(deprecated.synchronized);
    let metadata = deprecated.store_metadata.as_ref().unwrap();
    assert_eq!(metadata.deprecated, Some(true));
    assert_eq!(metadata.rev, Some(5));

    let failed = &people[1];
    assert!(!failed.synchronized);
    assert_eq!(failed.rev(), Some(4));
    let action = failed.last_action.as_ref().unwrap();
    assert_eq!(action.operation, "deprecate");
    assert_eq!(
        action.error,
        Some(StoreError::Deprecation(
            "incorrect revision '4' provided, expected '6'".to_string()
        ))
    );
}
