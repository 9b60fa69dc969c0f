//! Alibaba Cloud resource client
//!
//! Public addresses are elastic IPs from the VPC API and workloads are
//! elastic container groups from the ECI API. Both are RPC-style endpoints
//! that take signed GET requests and answer JSON.

use super::{AddressHandle, ProviderError, ResourceClient, WorkloadHandle};
use crate::config::{AddressConfig, Config, ProviderConfig, WorkloadConfig};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha1::Sha1;
use std::collections::BTreeMap;
use tracing::{debug, info};

type HmacSha1 = Hmac<Sha1>;

const VPC_API_VERSION: &str = "2016-04-28";
const ECI_API_VERSION: &str = "2018-08-08";

/// Page size used when listing addresses (provider maximum)
const ADDRESS_PAGE_SIZE: usize = 100;

const CONTAINER_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Percent-encode a value per RFC 3986 as the RPC signature requires
pub fn percent_encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Build the canonical query string: keys sorted, keys and values encoded
pub fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn string_to_sign(method: &str, canonical: &str) -> String {
    format!("{}&{}&{}", method, percent_encode("/"), percent_encode(canonical))
}

/// HMAC-SHA1 signature over the string to sign, keyed with `<secret>&`
pub fn signature(access_key_secret: &str, string_to_sign: &str) -> String {
    let mut mac = HmacSha1::new_from_slice(format!("{}&", access_key_secret).as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(string_to_sign.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Error body returned by the provider
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiErrorBody {
    code: Option<String>,
    message: Option<String>,
    request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AllocateEipAddressResponse {
    allocation_id: String,
    eip_address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeEipAddressesResponse {
    #[serde(default)]
    total_count: usize,
    #[serde(default)]
    eip_addresses: EipAddressSet,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EipAddressSet {
    #[serde(default)]
    eip_address: Vec<EipAddressItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EipAddressItem {
    allocation_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateContainerGroupResponse {
    container_group_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeContainerGroupsResponse {
    #[serde(default)]
    container_groups: Vec<ContainerGroupItem>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerGroupItem {
    container_group_id: String,
}

/// Response body for calls whose payload is ignored
#[derive(Debug, Deserialize)]
struct Ignored {}

/// Resource client backed by the VPC and ECI APIs
pub struct AliyunClient {
    http: reqwest::Client,
    access_key_id: String,
    access_key_secret: String,
    region_id: String,
    vpc_endpoint: String,
    eci_endpoint: String,
    address: AddressConfig,
    workload: WorkloadConfig,
}

impl AliyunClient {
    pub fn new(
        provider: &ProviderConfig,
        address: AddressConfig,
        workload: WorkloadConfig,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(provider.request_timeout())
            .build()?;

        Ok(Self {
            http,
            access_key_id: provider.access_key_id.clone(),
            access_key_secret: provider.access_key_secret.clone(),
            region_id: provider.region_id.clone(),
            vpc_endpoint: provider.vpc_endpoint(),
            eci_endpoint: provider.eci_endpoint(),
            address,
            workload,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        Self::new(
            &config.provider,
            config.address.clone(),
            config.workload.clone(),
        )
    }

    /// Parameters for a container group running the proxy
    pub fn create_workload_params(
        &self,
        address_id: &str,
        password: &str,
        port: u16,
    ) -> Vec<(String, String)> {
        let w = &self.workload;
        let mut params = vec![
            ("RegionId".to_string(), self.region_id.clone()),
            ("SecurityGroupId".to_string(), w.security_group_id.clone()),
            ("VSwitchId".to_string(), w.vswitch_id.clone()),
            ("ContainerGroupName".to_string(), w.group_name.clone()),
            ("RestartPolicy".to_string(), w.restart_policy.clone()),
            ("EipInstanceId".to_string(), address_id.to_string()),
            ("Container.1.Image".to_string(), w.image.clone()),
            ("Container.1.Name".to_string(), w.container_name.clone()),
            ("Container.1.Cpu".to_string(), w.cpu.to_string()),
            ("Container.1.Memory".to_string(), w.memory.to_string()),
            ("Container.1.ImagePullPolicy".to_string(), w.image_pull_policy.clone()),
            ("Container.1.WorkingDir".to_string(), w.working_dir.clone()),
            ("Container.1.Command.1".to_string(), "/bin/sh".to_string()),
            ("Container.1.Arg.1".to_string(), "-c".to_string()),
            ("Container.1.Arg.2".to_string(), w.render_command(password, port)),
            ("Container.1.EnvironmentVar.1.Key".to_string(), "PATH".to_string()),
            ("Container.1.EnvironmentVar.1.Value".to_string(), CONTAINER_PATH.to_string()),
        ];
        if let Some(zone) = &w.zone_id {
            params.push(("ZoneId".to_string(), zone.clone()));
        }
        params
    }

    /// Sign the parameters and build the full request URL
    fn signed_url(
        &self,
        endpoint: &str,
        version: &str,
        action: &str,
        params: Vec<(String, String)>,
    ) -> String {
        let mut query: BTreeMap<String, String> = params.into_iter().collect();
        query.insert("Action".to_string(), action.to_string());
        query.insert("Format".to_string(), "JSON".to_string());
        query.insert("Version".to_string(), version.to_string());
        query.insert("AccessKeyId".to_string(), self.access_key_id.clone());
        query.insert("SignatureMethod".to_string(), "HMAC-SHA1".to_string());
        query.insert("SignatureVersion".to_string(), "1.0".to_string());
        query.insert("SignatureNonce".to_string(), uuid::Uuid::new_v4().to_string());
        query.insert(
            "Timestamp".to_string(),
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        );

        let canonical = canonical_query(&query);
        let sig = signature(&self.access_key_secret, &string_to_sign("GET", &canonical));

        format!(
            "{}/?{}&Signature={}",
            endpoint.trim_end_matches('/'),
            canonical,
            percent_encode(&sig)
        )
    }

    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        version: &str,
        action: &str,
        params: Vec<(String, String)>,
    ) -> Result<T, ProviderError> {
        let url = self.signed_url(endpoint, version, action, params);
        debug!(action, endpoint, "Calling provider API");

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if let Ok(err) = serde_json::from_slice::<ApiErrorBody>(&body) {
            if let Some(code) = err.code {
                return Err(ProviderError::Api {
                    code,
                    message: err.message.unwrap_or_default(),
                    request_id: err.request_id.unwrap_or_default(),
                });
            }
        }

        if !status.is_success() {
            return Err(ProviderError::Api {
                code: status.as_u16().to_string(),
                message: String::from_utf8_lossy(&body).into_owned(),
                request_id: String::new(),
            });
        }

        serde_json::from_slice(&body)
            .map_err(|e| ProviderError::Decode(format!("{} response: {}", action, e)))
    }
}

#[async_trait]
impl ResourceClient for AliyunClient {
    async fn allocate_address(&self) -> Result<AddressHandle, ProviderError> {
        let params = vec![
            ("RegionId".to_string(), self.region_id.clone()),
            ("Bandwidth".to_string(), self.address.bandwidth.clone()),
            ("AutoPay".to_string(), "true".to_string()),
            ("InstanceChargeType".to_string(), self.address.instance_charge_type.clone()),
            ("InternetChargeType".to_string(), self.address.internet_charge_type.clone()),
        ];
        let resp: AllocateEipAddressResponse = self
            .call(&self.vpc_endpoint, VPC_API_VERSION, "AllocateEipAddress", params)
            .await?;

        info!(id = %resp.allocation_id, address = %resp.eip_address, "Allocated elastic IP");
        Ok(AddressHandle {
            id: resp.allocation_id,
            address: resp.eip_address,
        })
    }

    async fn release_address(&self, id: &str) -> Result<(), ProviderError> {
        let params = vec![
            ("RegionId".to_string(), self.region_id.clone()),
            ("AllocationId".to_string(), id.to_string()),
        ];
        let _: Ignored = self
            .call(&self.vpc_endpoint, VPC_API_VERSION, "ReleaseEipAddress", params)
            .await?;
        info!(id, "Released elastic IP");
        Ok(())
    }

    async fn list_addresses(&self) -> Result<Vec<String>, ProviderError> {
        let mut ids = Vec::new();
        let mut page = 1;

        loop {
            let params = vec![
                ("RegionId".to_string(), self.region_id.clone()),
                ("PageNumber".to_string(), page.to_string()),
                ("PageSize".to_string(), ADDRESS_PAGE_SIZE.to_string()),
            ];
            let resp: DescribeEipAddressesResponse = self
                .call(&self.vpc_endpoint, VPC_API_VERSION, "DescribeEipAddresses", params)
                .await?;

            let received = resp.eip_addresses.eip_address.len();
            ids.extend(resp.eip_addresses.eip_address.into_iter().map(|e| e.allocation_id));

            if received == 0 || ids.len() >= resp.total_count {
                break;
            }
            page += 1;
        }

        debug!(count = ids.len(), "Listed elastic IPs");
        Ok(ids)
    }

    async fn create_workload(
        &self,
        address_id: &str,
        password: &str,
        port: u16,
    ) -> Result<WorkloadHandle, ProviderError> {
        let params = self.create_workload_params(address_id, password, port);
        let resp: CreateContainerGroupResponse = self
            .call(&self.eci_endpoint, ECI_API_VERSION, "CreateContainerGroup", params)
            .await?;

        info!(id = %resp.container_group_id, address_id, port, "Created container group");
        Ok(WorkloadHandle {
            id: resp.container_group_id,
        })
    }

    async fn list_workloads(&self) -> Result<Vec<String>, ProviderError> {
        let mut ids = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut params = vec![("RegionId".to_string(), self.region_id.clone())];
            if let Some(token) = &next_token {
                params.push(("NextToken".to_string(), token.clone()));
            }
            let resp: DescribeContainerGroupsResponse = self
                .call(&self.eci_endpoint, ECI_API_VERSION, "DescribeContainerGroups", params)
                .await?;

            ids.extend(resp.container_groups.into_iter().map(|g| g.container_group_id));

            match resp.next_token.filter(|t| !t.is_empty()) {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        debug!(count = ids.len(), "Listed container groups");
        Ok(ids)
    }

    async fn delete_workload(&self, id: &str) -> Result<(), ProviderError> {
        let params = vec![
            ("RegionId".to_string(), self.region_id.clone()),
            ("ContainerGroupId".to_string(), id.to_string()),
        ];
        let _: Ignored = self
            .call(&self.eci_endpoint, ECI_API_VERSION, "DeleteContainerGroup", params)
            .await?;
        info!(id, "Deleted container group");
        Ok(())
    }
}
