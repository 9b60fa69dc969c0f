//! Provider client against a local stand-in for the VPC and ECI APIs

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use proxyshim::config::{AddressConfig, ProviderConfig, WorkloadConfig};
use proxyshim::provider::aliyun::{canonical_query, signature, string_to_sign};
use proxyshim::provider::{AliyunClient, ProviderError, ResourceClient};
use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

const ACCESS_KEY_SECRET: &str = "mock-secret";

type Params = HashMap<String, String>;
type Handler = Arc<dyn Fn(&Params) -> (u16, String) + Send + Sync>;

struct MockApi {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Params>>>,
}

impl MockApi {
    async fn start(handler: Handler) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&requests);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let handler = Arc::clone(&handler);
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                        let params = parse_query(req.uri().query().unwrap_or(""));
                        let (status, body) = handler(&params);
                        recorded.lock().unwrap().push(params);
                        async move {
                            Ok::<_, Infallible>(
                                Response::builder()
                                    .status(StatusCode::from_u16(status).unwrap())
                                    .header("content-type", "application/json")
                                    .body(Full::new(Bytes::from(body)))
                                    .unwrap(),
                            )
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self { addr, requests }
    }

    fn client(&self) -> AliyunClient {
        let endpoint = format!("http://{}", self.addr);
        let provider = ProviderConfig {
            region_id: "ap-southeast-1".to_string(),
            access_key_id: "mock-id".to_string(),
            access_key_secret: ACCESS_KEY_SECRET.to_string(),
            vpc_endpoint: Some(endpoint.clone()),
            eci_endpoint: Some(endpoint),
            ..Default::default()
        };
        let workload = WorkloadConfig {
            security_group_id: "sg-mock".to_string(),
            vswitch_id: "vsw-mock".to_string(),
            ..Default::default()
        };
        AliyunClient::new(&provider, AddressConfig::default(), workload).unwrap()
    }

    fn requests(&self) -> Vec<Params> {
        self.requests.lock().unwrap().clone()
    }
}

fn parse_query(query: &str) -> Params {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| {
            (
                urlencoding::decode(k).unwrap().into_owned(),
                urlencoding::decode(v).unwrap().into_owned(),
            )
        })
        .collect()
}

fn action(params: &Params) -> &str {
    params.get("Action").map(String::as_str).unwrap_or("")
}

fn ok(body: serde_json::Value) -> (u16, String) {
    (200, body.to_string())
}

#[tokio::test]
async fn test_allocate_address_signed_request() {
    let api = MockApi::start(Arc::new(|_: &Params| {
        ok(serde_json::json!({
            "AllocationId": "eip-abc",
            "EipAddress": "198.51.100.7",
            "RequestId": "r-1"
        }))
    }))
    .await;

    let handle = api.client().allocate_address().await.unwrap();
    assert_eq!(handle.id, "eip-abc");
    assert_eq!(handle.address, "198.51.100.7");

    let requests = api.requests();
    assert_eq!(requests.len(), 1);
    let params = &requests[0];
    assert_eq!(action(params), "AllocateEipAddress");
    assert_eq!(params["Version"], "2016-04-28");
    assert_eq!(params["Bandwidth"], "200");
    assert_eq!(params["AutoPay"], "true");
    assert_eq!(params["InstanceChargeType"], "PostPaid");
    assert_eq!(params["InternetChargeType"], "PayByTraffic");
    assert_eq!(params["RegionId"], "ap-southeast-1");
    assert_eq!(params["AccessKeyId"], "mock-id");

    // Recompute the signature from everything else that was sent
    let unsigned: BTreeMap<String, String> = params
        .iter()
        .filter(|(k, _)| k.as_str() != "Signature")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let expected = signature(ACCESS_KEY_SECRET, &string_to_sign("GET", &canonical_query(&unsigned)));
    assert_eq!(params["Signature"], expected);
}

#[tokio::test]
async fn test_api_error_is_mapped() {
    let api = MockApi::start(Arc::new(|_: &Params| {
        (
            400,
            serde_json::json!({
                "Code": "QuotaExceeded.Eip",
                "Message": "The EIP quota is exceeded.",
                "RequestId": "r-err"
            })
            .to_string(),
        )
    }))
    .await;

    match api.client().allocate_address().await {
        Err(ProviderError::Api { code, message, request_id }) => {
            assert_eq!(code, "QuotaExceeded.Eip");
            assert_eq!(message, "The EIP quota is exceeded.");
            assert_eq!(request_id, "r-err");
        }
        other => panic!("expected api error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_non_json_failure_uses_status() {
    let api = MockApi::start(Arc::new(|_: &Params| (502, "bad gateway".to_string()))).await;

    match api.client().release_address("eip-1").await {
        Err(ProviderError::Api { code, message, .. }) => {
            assert_eq!(code, "502");
            assert_eq!(message, "bad gateway");
        }
        other => panic!("expected api error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_success_body() {
    let api = MockApi::start(Arc::new(|_: &Params| ok(serde_json::json!({ "RequestId": "r" })))).await;

    let err = api.client().allocate_address().await.unwrap_err();
    assert!(matches!(err, ProviderError::Decode(_)));
}

#[tokio::test]
async fn test_list_addresses_follows_pages() {
    let api = MockApi::start(Arc::new(|params: &Params| {
        let items = match params.get("PageNumber").map(String::as_str) {
            Some("1") => vec!["eip-1", "eip-2"],
            Some("2") => vec!["eip-3"],
            _ => vec![],
        };
        let items: Vec<_> = items
            .into_iter()
            .map(|id| serde_json::json!({ "AllocationId": id }))
            .collect();
        ok(serde_json::json!({
            "TotalCount": 3,
            "EipAddresses": { "EipAddress": items }
        }))
    }))
    .await;

    let ids = api.client().list_addresses().await.unwrap();

    assert_eq!(ids, vec!["eip-1", "eip-2", "eip-3"]);
    let requests = api.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|p| action(p) == "DescribeEipAddresses"));
}

#[tokio::test]
async fn test_list_addresses_empty() {
    let api = MockApi::start(Arc::new(|_: &Params| {
        ok(serde_json::json!({ "TotalCount": 0, "EipAddresses": { "EipAddress": [] } }))
    }))
    .await;

    assert!(api.client().list_addresses().await.unwrap().is_empty());
    assert_eq!(api.requests().len(), 1);
}

#[tokio::test]
async fn test_list_workloads_follows_next_token() {
    let api = MockApi::start(Arc::new(|params: &Params| {
        match params.get("NextToken").map(String::as_str) {
            None => ok(serde_json::json!({
                "ContainerGroups": [{ "ContainerGroupId": "eci-1" }, { "ContainerGroupId": "eci-2" }],
                "NextToken": "page-2"
            })),
            Some("page-2") => ok(serde_json::json!({
                "ContainerGroups": [{ "ContainerGroupId": "eci-3" }],
                "NextToken": ""
            })),
            Some(_) => (400, r#"{"Code":"InvalidNextToken","Message":"bad"}"#.to_string()),
        }
    }))
    .await;

    let ids = api.client().list_workloads().await.unwrap();

    assert_eq!(ids, vec!["eci-1", "eci-2", "eci-3"]);
    let requests = api.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0]["Version"], "2018-08-08");
    assert_eq!(action(&requests[0]), "DescribeContainerGroups");
}

#[tokio::test]
async fn test_create_and_delete_workload() {
    let api = MockApi::start(Arc::new(|params: &Params| match action(params) {
        "CreateContainerGroup" => ok(serde_json::json!({ "ContainerGroupId": "eci-new" })),
        "DeleteContainerGroup" => ok(serde_json::json!({ "RequestId": "r" })),
        _ => (404, "{}".to_string()),
    }))
    .await;
    let client = api.client();

    let workload = client.create_workload("eip-abc", "pw", 8388).await.unwrap();
    assert_eq!(workload.id, "eci-new");
    client.delete_workload("eci-new").await.unwrap();

    let requests = api.requests();
    assert_eq!(requests[0]["EipInstanceId"], "eip-abc");
    assert_eq!(requests[0]["SecurityGroupId"], "sg-mock");
    assert!(requests[0]["Container.1.Arg.2"].contains(":pw@:8388"));
    assert_eq!(action(&requests[1]), "DeleteContainerGroup");
    assert_eq!(requests[1]["ContainerGroupId"], "eci-new");
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let provider = ProviderConfig {
        region_id: "r".to_string(),
        access_key_id: "id".to_string(),
        access_key_secret: "s".to_string(),
        vpc_endpoint: Some(format!("http://{}", addr)),
        ..Default::default()
    };
    let client = AliyunClient::new(&provider, AddressConfig::default(), WorkloadConfig::default()).unwrap();

    let err = client.list_addresses().await.unwrap_err();
    assert!(matches!(err, ProviderError::Transport(_)));
}
