//! End-to-end behaviour of generated CRUD routes over the in-memory store.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use cruds_sdk::config::Operation;
use cruds_sdk::filter::FilterSpec;
use cruds_sdk::store::Store;
use cruds_sdk::{
    CrudSite, FieldInfo, FieldKind, FormKind, FormRole, MemoryAuthBackend, MemoryStore, ModelDescriptor,
    MultiEntityForm, PermissionRule, Principal, Record, SplitSearch, ViewConfig, ViewConfigBuilder, ViewMode,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn customer() -> Arc<ModelDescriptor> {
    Arc::new(
        ModelDescriptor::new("crm", "Customer")
            .field(FieldInfo::new("name", FieldKind::Text).required())
            .field(FieldInfo::new("email", FieldKind::Text)),
    )
}

fn invoice() -> Arc<ModelDescriptor> {
    Arc::new(
        ModelDescriptor::new("billing", "Invoice")
            .field(FieldInfo::new("customer", FieldKind::ForeignKey("crm.customer".into())))
            .field(FieldInfo::new("number", FieldKind::Text).required())
            .field(FieldInfo::new("status", FieldKind::Choice(vec!["draft".into(), "sent".into()]))),
    )
}

fn rec(v: Value) -> Record {
    v.as_object().cloned().unwrap()
}

fn auth() -> MemoryAuthBackend {
    let auth = MemoryAuthBackend::new();
    auth.add_user(Principal::superuser("admin"));
    auth.add_user(Principal::user("clerk"));
    auth.add_user(Principal::user("editor").with_perm("billing.change_invoice"));
    auth
}

fn app(store: Arc<MemoryStore>, views: Vec<ViewConfig>) -> (CrudSite, Router) {
    let site = CrudSite::builder(store, Arc::new(auth()))
        .register_all(views.into_iter().map(Arc::new))
        .build()
        .unwrap();
    let router = site.router();
    (site, router)
}

fn get(uri: &str, user: Option<&str>) -> Request<Body> {
    let mut b = Request::builder().method("GET").uri(uri);
    if let Some(u) = user {
        b = b.header("X-User-ID", u);
    }
    b.body(Body::empty()).unwrap()
}

fn post(uri: &str, user: &str, form: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("X-User-ID", user)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Option<String>, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let location = resp
        .headers()
        .get(header::LOCATION)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, location, body)
}

fn numbers(body: &Value) -> Vec<String> {
    body["context"]["object_list"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["object"]["number"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn anonymous_requests_redirect_to_login() {
    let store = Arc::new(MemoryStore::new());
    let (_, app) = app(store, vec![ViewConfigBuilder::new(customer()).build().unwrap()]);
    let (status, location, _) = send(&app, get("/crm/customer/list?q=a", None)).await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(
        location.as_deref(),
        Some("/accounts/login/?next=%2Fcrm%2Fcustomer%2Flist%3Fq%3Da")
    );
}

#[tokio::test]
async fn split_search_matches_any_token() {
    let store = Arc::new(MemoryStore::new());
    let c = customer();
    for (name, email) in [("John Smith", "js@x.io"), ("Ann", "doe@x.io"), ("Bob", "bob@x.io")] {
        store.insert(&c, &rec(json!({ "name": name, "email": email }))).await.unwrap();
    }
    let view = ViewConfigBuilder::new(c)
        .search_fields(vec!["name".into(), "email".into()])
        .split_space_search(SplitSearch::Whitespace)
        .build()
        .unwrap();
    let (_, app) = app(store, vec![view]);

    let (status, _, body) = send(&app, get("/crm/customer/list?q=john%20doe", Some("admin"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["template"], "crm/customer/cruds/list.html");
    assert_eq!(body["context"]["object_list"].as_array().unwrap().len(), 2);
    assert_eq!(body["context"]["q"], "john doe");
    assert_eq!(body["context"]["page_obj"]["count"], 2);
}

#[tokio::test]
async fn unsplit_search_matches_whole_term() {
    let store = Arc::new(MemoryStore::new());
    let c = customer();
    for name in ["John Doe", "John Smith"] {
        store.insert(&c, &rec(json!({ "name": name }))).await.unwrap();
    }
    let view = ViewConfigBuilder::new(c).search_fields(vec!["name".into()]).build().unwrap();
    let (_, app) = app(store, vec![view]);
    let (_, _, body) = send(&app, get("/crm/customer/list?q=john%20doe", Some("admin"))).await;
    assert_eq!(body["context"]["object_list"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn disabled_operations_get_no_route() {
    let store = Arc::new(MemoryStore::new());
    let view = ViewConfigBuilder::new(invoice())
        .views_available(vec![Operation::List, Operation::Detail])
        .build()
        .unwrap();
    let (site, app) = app(store, vec![view]);
    assert_eq!(site.reverse("billing_invoice_create", None), None);
    assert_eq!(site.reverse("billing_invoice_update", Some("1")), None);
    assert!(site.reverse("billing_invoice_list", None).is_some());

    let (status, _, _) = send(&app, get("/billing/invoice/1/update", Some("admin"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, _, body) = send(&app, get("/billing/invoice/list", Some("admin"))).await;
    assert_eq!(body["context"]["url_create"], Value::Null);
    assert_eq!(body["context"]["crud_perms"]["create"], false);
}

#[tokio::test]
async fn text_keys_with_spaces_round_trip_through_links() {
    let store = Arc::new(MemoryStore::new());
    let sku = Arc::new(
        ModelDescriptor::new("catalog", "Sku")
            .field(FieldInfo::new("title", FieldKind::Text))
            .primary_key(FieldInfo::new("code", FieldKind::Text)),
    );
    store
        .insert(&sku, &rec(json!({ "code": "A B", "title": "Bolt" })))
        .await
        .unwrap();
    let (_, app) = app(store.clone(), vec![ViewConfigBuilder::new(sku.clone()).build().unwrap()]);

    let (status, _, body) = send(&app, get("/catalog/sku/list", Some("admin"))).await;
    assert_eq!(status, StatusCode::OK);
    let links = &body["context"]["object_list"][0]["links"];
    assert_eq!(links["detail"], "/catalog/sku/A%20B");

    let (status, _, body) = send(&app, get(links["detail"].as_str().unwrap(), Some("admin"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["context"]["object"]["code"], "A B");
    assert_eq!(body["context"]["url_update"], "/catalog/sku/A%20B/update");

    let (status, location, _) = send(&app, post(links["delete"].as_str().unwrap(), "admin", "")).await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(location.as_deref(), Some("/catalog/sku/list"));
    assert!(store.is_empty(&sku));
}

#[tokio::test]
async fn delete_without_permission_is_forbidden_and_keeps_the_record() {
    let store = Arc::new(MemoryStore::new());
    let inv = invoice();
    let row = store.insert(&inv, &rec(json!({ "number": "A-1" }))).await.unwrap();
    let view = ViewConfigBuilder::new(inv.clone())
        .check_perms(false)
        .permission(Operation::Delete, PermissionRule::perm("billing.change_invoice"))
        .build()
        .unwrap();
    let (_, app) = app(store.clone(), vec![view]);
    let uri = format!("/billing/invoice/{}/delete", row["id"]);

    let (status, _, body) = send(&app, post(&uri, "clerk", "")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "forbidden");
    assert_eq!(store.len(&inv), 1);

    let (status, location, _) = send(&app, post(&uri, "editor", "")).await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(location.as_deref(), Some("/billing/invoice/list"));
    assert!(store.is_empty(&inv));
}

#[tokio::test]
async fn default_permissions_guard_every_operation() {
    let store = Arc::new(MemoryStore::new());
    let (_, app) = app(store, vec![ViewConfigBuilder::new(invoice()).build().unwrap()]);
    let (status, _, _) = send(&app, get("/billing/invoice/list", Some("clerk"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _, _) = send(&app, get("/billing/invoice/list", Some("admin"))).await;
    assert_eq!(status, StatusCode::OK);
}

async fn scoped_fixture() -> (Arc<MemoryStore>, Router, Value) {
    let store = Arc::new(MemoryStore::new());
    let (c, inv) = (customer(), invoice());
    let acme = store.insert(&c, &rec(json!({ "name": "Acme" }))).await.unwrap();
    let other = store.insert(&c, &rec(json!({ "name": "Other" }))).await.unwrap();
    for (cust, number, status) in [(&acme, "A-1", "draft"), (&acme, "A-2", "sent"), (&other, "O-1", "draft")] {
        store
            .insert(&inv, &rec(json!({ "customer": cust["id"], "number": number, "status": status })))
            .await
            .unwrap();
    }
    let view = ViewConfigBuilder::new(inv.clone())
        .related_field("customer", c)
        .list_filter(vec![FilterSpec::infer(&inv, "status").unwrap()])
        .build()
        .unwrap();
    let (_, app) = app(store.clone(), vec![view]);
    (store, app, acme["id"].clone())
}

#[tokio::test]
async fn related_scope_narrows_lists_and_carries_into_links() {
    let (_, app, acme) = scoped_fixture().await;
    let (status, _, body) = send(&app, get(&format!("/billing/invoice/list?customer={}", acme), Some("admin"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(numbers(&body), vec!["A-1", "A-2"]);

    let ctx = &body["context"];
    let scope_param = format!("customer={}", acme);
    assert_eq!(ctx["getparams"], format!("?{}&", scope_param));
    assert_eq!(ctx["links"]["create"], format!("/billing/invoice/create?{}", scope_param));
    assert_eq!(ctx["context_rel"]["customer"]["name"], "Acme");
    for row in ctx["object_list"].as_array().unwrap() {
        for action in ["detail", "update", "delete"] {
            let link = row["links"][action].as_str().unwrap();
            assert!(link.ends_with(&format!("?{}", scope_param)), "{}", link);
        }
    }
}

#[tokio::test]
async fn filters_apply_and_are_echoed_but_search_is_not() {
    let (_, app, acme) = scoped_fixture().await;
    let uri = format!("/billing/invoice/list?customer={}&status=draft&q=&page=1", acme);
    let (_, _, body) = send(&app, get(&uri, Some("admin"))).await;
    assert_eq!(numbers(&body), vec!["A-1"]);
    assert_eq!(body["context"]["getparams"], format!("?customer={}&status=draft&", acme));
}

#[tokio::test]
async fn unknown_scope_entity_is_not_found() {
    let (_, app, _) = scoped_fixture().await;
    let (status, _, _) = send(&app, get("/billing/invoice/list?customer=999", Some("admin"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn create_stamps_scope_and_redirects_with_params() {
    let (store, app, acme) = scoped_fixture().await;
    let inv = invoice();
    let uri = format!("/billing/invoice/create?customer={}", acme);

    let (status, _, body) = send(&app, get(&uri, Some("admin"))).await;
    assert_eq!(status, StatusCode::OK);
    let fields: Vec<&str> = body["context"]["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    assert_eq!(fields, vec!["number", "status"]);

    let (status, location, _) = send(&app, post(&uri, "admin", "number=A-3&status=sent")).await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(location, Some(format!("/billing/invoice/list?customer={}", acme)));
    let created = store.find_one(&inv, "number", &json!("A-3")).await.unwrap().unwrap();
    assert_eq!(created["customer"], acme);
}

#[tokio::test]
async fn invalid_forms_rerender_without_writing() {
    let (store, app, _) = scoped_fixture().await;
    let inv = invoice();
    let (status, location, body) = send(&app, post("/billing/invoice/create", "admin", "status=bogus")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(location.is_none());
    let errors = &body["context"]["form"]["errors"];
    assert!(errors["number"].is_array());
    assert!(errors["status"].is_array());
    assert_eq!(store.len(&inv), 3);
}

#[tokio::test]
async fn instances_outside_the_scope_are_not_found() {
    let (store, app, acme) = scoped_fixture().await;
    let other = store.find_one(&invoice(), "number", &json!("O-1")).await.unwrap().unwrap();
    let uri = format!("/billing/invoice/{}?customer={}", other["id"], acme);
    let (status, _, _) = send(&app, get(&uri, Some("admin"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, body) = send(&app, get(&format!("/billing/invoice/{}", other["id"]), Some("admin"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["context"]["object"]["number"], "O-1");
    assert_eq!(
        body["context"]["url_update"],
        format!("/billing/invoice/{}/update", other["id"])
    );
}

#[tokio::test]
async fn update_writes_submitted_fields() {
    let (store, app, _) = scoped_fixture().await;
    let inv = invoice();
    let row = store.find_one(&inv, "number", &json!("A-1")).await.unwrap().unwrap();
    let uri = format!("/billing/invoice/{}/update", row["id"]);

    let (status, _, body) = send(&app, get(&uri, Some("admin"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["context"]["form"]["data"]["number"], "A-1");

    let (status, location, _) = send(&app, post(&uri, "admin", "number=A-1b&status=sent&customer=")).await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(location.as_deref(), Some("/billing/invoice/list"));
    let updated = store.get(&inv, &row["id"]).await.unwrap().unwrap();
    assert_eq!(updated["number"], "A-1b");
    assert_eq!(updated["status"], "sent");
}

fn user_model() -> Arc<ModelDescriptor> {
    Arc::new(
        ModelDescriptor::new("accounts", "User")
            .field(FieldInfo::new("name", FieldKind::Text).required())
            .field(FieldInfo::new("email", FieldKind::Text)),
    )
}

fn profile_model() -> Arc<ModelDescriptor> {
    Arc::new(
        ModelDescriptor::new("accounts", "Profile")
            .field(FieldInfo::new("user", FieldKind::ForeignKey("accounts.user".into())).required())
            .field(FieldInfo::new("bio", FieldKind::Text)),
    )
}

fn multi_view() -> ViewConfig {
    let form = MultiEntityForm::new(
        "user",
        vec![
            FormRole::new("user", user_model()).fields(vec!["name".into(), "email".into()]),
            FormRole::new("profile", profile_model()).key_field("user").fields(vec!["bio".into()]),
        ],
    )
    .unwrap();
    ViewConfigBuilder::new(user_model())
        .add_form(FormKind::Multi(Arc::new(form)))
        .build()
        .unwrap()
}

#[tokio::test]
async fn multi_entity_update_with_missing_role_is_not_found() {
    let store = Arc::new(MemoryStore::new());
    let lonely = store.insert(&user_model(), &rec(json!({ "name": "Solo" }))).await.unwrap();
    let (_, app) = app(store, vec![multi_view()]);
    let uri = format!("/accounts/user/{}/update", lonely["id"]);

    let (status, _, body) = send(&app, get(&uri, Some("admin"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["context"].is_null());

    let (status, _, _) = send(&app, post(&uri, "admin", "name=X&bio=y")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn multi_entity_forms_save_all_roles_or_none() {
    let store = Arc::new(MemoryStore::new());
    let (users, profiles) = (user_model(), profile_model());
    let (_, app) = app(store.clone(), vec![multi_view()]);

    let (status, _, body) = send(&app, get("/accounts/user/create", Some("admin"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["context"]["fields"].as_array().unwrap().len(), 3);

    let (status, location, _) = send(&app, post("/accounts/user/create", "admin", "name=Ann&email=a%40x.io&bio=hello")).await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(location.as_deref(), Some("/accounts/user/list"));
    let user = store.find_one(&users, "name", &json!("Ann")).await.unwrap().unwrap();
    let profile = store.find_one(&profiles, "user", &user["id"]).await.unwrap().unwrap();
    assert_eq!(profile["bio"], "hello");

    let uri = format!("/accounts/user/{}/update", user["id"]);
    let (status, _, body) = send(&app, get(&uri, Some("admin"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["context"]["form"]["data"]["bio"], "hello");

    let (status, _, body) = send(&app, post(&uri, "admin", "name=&bio=changed")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["context"]["form"]["errors"]["name"].is_array());
    let profile = store.find_one(&profiles, "user", &user["id"]).await.unwrap().unwrap();
    assert_eq!(profile["bio"], "hello");

    let (status, _, _) = send(&app, post(&uri, "admin", "name=Anna&bio=changed")).await;
    assert_eq!(status, StatusCode::FOUND);
    let user = store.get(&users, &user["id"]).await.unwrap().unwrap();
    let profile = store.find_one(&profiles, "user", &user["id"]).await.unwrap().unwrap();
    assert_eq!((user["name"].as_str(), profile["bio"].as_str()), (Some("Anna"), Some("changed")));
}

#[tokio::test]
async fn json_views_answer_invalid_forms_with_422() {
    let store = Arc::new(MemoryStore::new());
    let view = ViewConfigBuilder::new(customer()).mode(ViewMode::Json).build().unwrap();
    let (site, app) = app(store.clone(), vec![view]);
    assert_eq!(site.routes().len(), 2);

    let req = Request::builder()
        .method("POST")
        .uri("/crm/customer_json/create")
        .header("X-User-ID", "admin")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "email": "x@y.io" }).to_string()))
        .unwrap();
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["template"], "crm/customer/cruds/create_json.html");
    assert!(store.is_empty(&customer()));

    let (status, _, _) = send(&app, get("/crm/customer/list", Some("admin"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn owner_field_limits_rows_to_their_owner() {
    let store = Arc::new(MemoryStore::new());
    let note = Arc::new(
        ModelDescriptor::new("notes", "Note")
            .field(FieldInfo::new("owner", FieldKind::Text))
            .field(FieldInfo::new("body", FieldKind::Text)),
    );
    let view = ViewConfigBuilder::new(note.clone())
        .check_perms(false)
        .owner_field("owner")
        .build()
        .unwrap();
    let (_, app) = app(store.clone(), vec![view]);

    let (status, _, _) = send(&app, post("/notes/note/create", "admin", "body=mine&owner=clerk")).await;
    assert_eq!(status, StatusCode::FOUND);
    let row = store.find_one(&note, "body", &json!("mine")).await.unwrap().unwrap();
    assert_eq!(row["owner"], "admin");

    let (_, _, body) = send(&app, get("/notes/note/list", Some("clerk"))).await;
    assert_eq!(body["context"]["object_list"].as_array().unwrap().len(), 0);
    let (status, _, _) = send(&app, get(&format!("/notes/note/{}", row["id"]), Some("clerk"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, _, body) = send(&app, get("/notes/note/list", Some("admin"))).await;
    assert_eq!(body["context"]["object_list"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn out_of_range_pages_are_not_found() {
    let store = Arc::new(MemoryStore::new());
    let c = customer();
    for i in 0..3 {
        store.insert(&c, &rec(json!({ "name": format!("c{}", i) }))).await.unwrap();
    }
    let view = ViewConfigBuilder::new(c).paginate_by(Some(2)).build().unwrap();
    let (_, app) = app(store, vec![view]);
    let (_, _, body) = send(&app, get("/crm/customer/list?page=last", Some("admin"))).await;
    assert_eq!(body["context"]["page_obj"]["number"], 2);
    assert_eq!(body["context"]["is_paginated"], true);
    let (status, _, _) = send(&app, get("/crm/customer/list?page=9", Some("admin"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn service_routes_are_mounted() {
    let store = Arc::new(MemoryStore::new());
    let (_, app) = app(store, vec![ViewConfigBuilder::new(customer()).build().unwrap()]);
    let (status, _, body) = send(&app, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    let (status, _, body) = send(&app, get("/ready", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"], "ok");
    let (_, _, body) = send(&app, get("/version", None)).await;
    assert_eq!(body["name"], "cruds-sdk");
    let (status, _, body) = send(&app, get("/info", None)).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["url_names"].as_array().unwrap().iter().filter_map(Value::as_str).collect();
    assert_eq!(
        names,
        vec![
            "crm_customer_create",
            "crm_customer_delete",
            "crm_customer_detail",
            "crm_customer_list",
            "crm_customer_update"
        ]
    );
}
