use std::collections::BTreeMap;

use network_tap_light::{NetworkTapLight, PageId, TapError, TapEvent};

fn sent(id: &str, url: &str) -> TapEvent {
    TapEvent::RequestWillBeSent {
        request_id: id.into(),
        url: url.into(),
        method: "GET".into(),
        headers: BTreeMap::new(),
        post_data: None,
        resource_type: "XHR".into(),
    }
}

#[tokio::test]
async fn enable_and_disable_track_pages() {
    let (tap, _rx) = NetworkTapLight::new(16);
    let page = PageId::new();

    tap.enable(page.clone()).await.unwrap();
    assert!(tap.snapshot(&page).await.is_some());

    tap.disable(&page).await.unwrap();
    assert!(tap.snapshot(&page).await.is_none());
    assert!(matches!(
        tap.disable(&page).await,
        Err(TapError::PageNotEnabled)
    ));
}

#[tokio::test]
async fn events_for_unknown_pages_and_requests_are_rejected() {
    let (tap, _rx) = NetworkTapLight::new(16);
    let page = PageId::new();
    assert!(matches!(
        tap.ingest(&page, sent("1", "https://a.test/")).await,
        Err(TapError::PageNotEnabled)
    ));

    tap.enable(page.clone()).await.unwrap();
    let err = tap
        .ingest(
            &page,
            TapEvent::ResponseReceived {
                request_id: "missing".into(),
                status: 200,
                content_type: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TapError::UnknownRequest(id) if id == "missing"));
}

#[tokio::test]
async fn request_headers_and_body_are_captured() {
    let (tap, _rx) = NetworkTapLight::new(16);
    let page = PageId::new();
    tap.enable(page.clone()).await.unwrap();

    let mut headers = BTreeMap::new();
    headers.insert("content-type".to_string(), "application/json".to_string());
    tap.ingest(
        &page,
        TapEvent::RequestWillBeSent {
            request_id: "p".into(),
            url: "https://a.test/api/search".into(),
            method: "POST".into(),
            headers,
            post_data: Some(r#"{"q":"shoes"}"#.into()),
            resource_type: "Fetch".into(),
        },
    )
    .await
    .unwrap();
    tap.ingest(
        &page,
        TapEvent::ResponseReceived {
            request_id: "p".into(),
            status: 201,
            content_type: Some("application/json".into()),
        },
    )
    .await
    .unwrap();
    tap.ingest(
        &page,
        TapEvent::LoadingFinished {
            request_id: "p".into(),
            body: Some("[]".into()),
            encoded_length: Some(120),
        },
    )
    .await
    .unwrap();

    let calls = tap.drain(&page).await.unwrap();
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(call.method, "POST");
    assert_eq!(call.status, 201);
    assert_eq!(call.request_body.as_deref(), Some(r#"{"q":"shoes"}"#));
    assert_eq!(call.response_size, Some(120));
    assert!(!call.body_truncated);
}
