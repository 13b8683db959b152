//! Retrieval against a mock store.
//!
//! Verifies that sources and metadata are fetched separately, that versions and identifier
//! query parameters reach the server, and how 404s on store addresses fall back.

mod common;

use common::{metadata_payload, path, quote, BUCKET};
use mockito::{Matcher, Server};
use nexus_store::{Property, StoreError, Version};
use serde_json::json;

fn source(id: &str) -> serde_json::Value {
    json!({
        "@context": {"@vocab": "http://example.org/vocab/"},
        "@id": id,
        "@type": "Person",
        "name": "Jane",
    })
}

#[test_log::test(tokio::test)]
async fn test_retrieve_source_and_metadata() {
    let mut server = Server::new_async().await;
    let id = "http://data.net/jane";
    let resource_path = format!("/resources/{BUCKET}/_/{}", quote(id));
    let get_source = server
        .mock("GET", path(&format!("{resource_path}/source")))
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(source(id).to_string())
        .create_async()
        .await;
    let get_metadata = server
        .mock("GET", path(&resource_path))
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(metadata_payload(&server, id, 5).to_string())
        .create_async()
        .await;

    let store = common::store(&server);
    let jane = store.retrieve(id, None, false, true).await.unwrap();

    get_source.assert_async().await;
    get_metadata.assert_async().await;
    assert_eq!(jane.id.as_deref(), Some(id));
    assert_eq!(jane.get("name"), Some(&Property::Value(json!("Jane"))));
    assert_eq!(jane.rev(), Some(5));
    assert_eq!(
        jane.context,
        Some(json!({"@vocab": "http://example.org/vocab/"}))
    );
    assert!(jane.synchronized);
    assert_eq!(jane.last_action.unwrap().operation, "retrieve");
}

#[test_log::test(tokio::test)]
async fn test_retrieve_expanded_payload_in_one_request() {
    let mut server = Server::new_async().await;
    let id = "http://data.net/jane";
    let mut payload = metadata_payload(&server, id, 2);
    payload["name"] = json!("Jane");
    let get = server
        .mock("GET", path(&format!("/resources/{BUCKET}/_/{}", quote(id))))
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(payload.to_string())
        .expect(1)
        .create_async()
        .await;

    let store = common::store(&server);
    let jane = store.retrieve(id, None, false, false).await.unwrap();

    get.assert_async().await;
    assert_eq!(jane.rev(), Some(2));
    assert_eq!(jane.get("name"), Some(&Property::Value(json!("Jane"))));
    // the store's own metadata context is not kept on the resource
    assert!(jane.context.is_none());
}

#[test_log::test(tokio::test)]
async fn test_retrieve_version_and_identifier_params() {
    let mut server = Server::new_async().await;
    let id = "http://data.net/jane";
    let resource_path = format!("/resources/{BUCKET}/_/{}", quote(id));
    let by_tag = server
        .mock("GET", path(&resource_path))
        .match_query(Matcher::UrlEncoded("tag".into(), "v1.0".into()))
        .with_status(200)
        .with_body(metadata_payload(&server, id, 3).to_string())
        .create_async()
        .await;
    let by_rev = server
        .mock("GET", path(&resource_path))
        .match_query(Matcher::UrlEncoded("rev".into(), "2".into()))
        .with_status(200)
        .with_body(metadata_payload(&server, id, 2).to_string())
        .create_async()
        .await;

    let store = common::store(&server);
    let tagged = store
        .retrieve(id, Some(Version::from("v1.0")), false, false)
        .await
        .unwrap();
    assert_eq!(tagged.rev(), Some(3));

    // a revision written in the identifier is honoured
    let second = store
        .retrieve(&format!("{id}?rev=2"), None, false, false)
        .await
        .unwrap();
    assert_eq!(second.rev(), Some(2));

    by_tag.assert_async().await;
    by_rev.assert_async().await;
}

#[test_log::test(tokio::test)]
async fn test_retrieve_falls_back_to_store_address() {
    let mut server = Server::new_async().await;
    let address = format!("{}/resources/{BUCKET}/_/jane", server.url());
    let lookup = server
        .mock(
            "GET",
            path(&format!("/resources/{BUCKET}/_/{}/source", quote(&address))),
        )
        .match_query(Matcher::Any)
        .with_status(404)
        .with_body(json!({"@type": "ResourceNotFound"}).to_string())
        .create_async()
        .await;
    let direct_source = server
        .mock("GET", path(&format!("/resources/{BUCKET}/_/jane/source")))
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(source("http://data.net/jane").to_string())
        .create_async()
        .await;
    let direct_metadata = server
        .mock("GET", path(&format!("/resources/{BUCKET}/_/jane")))
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(metadata_payload(&server, "http://data.net/jane", 7).to_string())
        .create_async()
        .await;

    let store = common::store(&server);
    let jane = store.retrieve(&address, None, false, true).await.unwrap();

    lookup.assert_async().await;
    direct_source.assert_async().await;
    direct_metadata.assert_async().await;
    assert_eq!(jane.id.as_deref(), Some("http://data.net/jane"));
    assert_eq!(jane.rev(), Some(7));
}

#[test_log::test(tokio::test)]
async fn test_retrieve_reports_the_first_error() {
    let mut server = Server::new_async().await;
    let address = format!("{}/resources/{BUCKET}/_/ghost", server.url());
    server
        .mock(
            "GET",
            path(&format!("/resources/{BUCKET}/_/{}", quote(&address))),
        )
        .match_query(Matcher::Any)
        .with_status(404)
        .with_body(json!({"reason": "Resource 'ghost' not found."}).to_string())
        .create_async()
        .await;
    let retry = server
        .mock("GET", path(&format!("/resources/{BUCKET}/_/ghost")))
        .match_query(Matcher::Any)
        .with_status(500)
        .with_body(json!({"reason": "Something else."}).to_string())
        .expect(1)
        .create_async()
        .await;

    let store = common::store(&server);
    let error = store
        .retrieve(&address, None, false, false)
        .await
        .unwrap_err();

    retry.assert_async().await;
    assert_eq!(
        error,
        StoreError::Retrieval("resource 'ghost' not found".to_string())
    );
}

#[test_log::test(tokio::test)]
async fn test_retrieve_without_fallback_outside_the_store() {
    let mut server = Server::new_async().await;
    let id = "http://data.net/ghost";
    server
        .mock("GET", path(&format!("/resources/{BUCKET}/_/{}", quote(id))))
        .match_query(Matcher::Any)
        .with_status(404)
        .with_body(json!({"@type": "ResourceNotFound"}).to_string())
        .expect(1)
        .create_async()
        .await;

    let store = common::store(&server);
    assert_eq!(
        store.retrieve(id, None, false, false).await,
        Err(StoreError::Retrieval("resource not found".to_string()))
    );
}

#[test_log::test(tokio::test)]
async fn test_retrieve_cross_bucket_through_the_resolver() {
    let mut server = Server::new_async().await;
    let id = "http://data.net/jane";
    let resolve = server
        .mock("GET", path(&format!("/resolvers/{BUCKET}/_/{}", quote(id))))
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(metadata_payload(&server, id, 4).to_string())
        .expect(1)
        .create_async()
        .await;
    // the source is read from the resource's own address, not from the resolver
    let get_source = server
        .mock(
            "GET",
            path(&format!("/resources/{BUCKET}/_/{}/source", quote(id))),
        )
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(source(id).to_string())
        .expect(1)
        .create_async()
        .await;

    let store = common::store(&server);
    let jane = store.retrieve(id, None, true, true).await.unwrap();

    resolve.assert_async().await;
    get_source.assert_async().await;
    assert_eq!(jane.id.as_deref(), Some(id));
    assert_eq!(jane.get("name"), Some(&Property::Value(json!("Jane"))));
    assert_eq!(jane.rev(), Some(4));
    assert!(jane.synchronized);
}

#[test_log::test(tokio::test)]
async fn test_retrieve_cross_bucket_falls_back_to_any_store_address() {
    let mut server = Server::new_async().await;
    let address = format!("{}/resources/other/project/_/jane", server.url());
    let resolve = server
        .mock(
            "GET",
            path(&format!("/resolvers/{BUCKET}/_/{}", quote(&address))),
        )
        .match_query(Matcher::Any)
        .with_status(404)
        .with_body(json!({"@type": "ResourceNotFound"}).to_string())
        .create_async()
        .await;
    let mut payload = metadata_payload(&server, "http://data.net/jane", 6);
    payload["name"] = json!("Jane");
    let direct = server
        .mock("GET", path("/resources/other/project/_/jane"))
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(payload.to_string())
        .expect(1)
        .create_async()
        .await;

    let store = common::store(&server);
    let jane = store.retrieve(&address, None, true, false).await.unwrap();

    resolve.assert_async().await;
    direct.assert_async().await;
    assert_eq!(jane.id.as_deref(), Some("http://data.net/jane"));
    assert_eq!(jane.get("name"), Some(&Property::Value(json!("Jane"))));
    assert_eq!(jane.rev(), Some(6));
}

#[test_log::test(tokio::test)]
async fn test_retrieve_query_written_inside_the_fragment() {
    let mut server = Server::new_async().await;
    let id = "http://data.net/jane#part";
    let get = server
        .mock("GET", path(&format!("/resources/{BUCKET}/_/{}", quote(id))))
        .match_query(Matcher::UrlEncoded("rev".into(), "2".into()))
        .with_status(200)
        .with_body(metadata_payload(&server, id, 2).to_string())
        .expect(1)
        .create_async()
        .await;

    let store = common::store(&server);
    let part = store
        .retrieve("http://data.net/jane#part?rev=2", None, false, false)
        .await
        .unwrap();

    get.assert_async().await;
    assert_eq!(part.id.as_deref(), Some(id));
    assert_eq!(part.rev(), Some(2));
}
