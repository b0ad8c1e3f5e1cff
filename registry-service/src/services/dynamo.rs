//! DynamoDB stores.
//!
//! Organizations are keyed by name so a conditional put enforces uniqueness.
//! Module versions live under a `org/name/provider` partition with the
//! version as sort key; the organization index serves per-organization
//! listings. VCS connections are keyed by id, with indexes on `client_id`
//! and the owning organization id. Index reads are eventually consistent.

use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, GlobalSecondaryIndex, KeySchemaElement,
    KeyType, Projection, ProjectionType, ReturnValue, ScalarAttributeType, TableStatus,
};
use aws_sdk_dynamodb::Client as DynamoClient;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

use crate::models::module::{latest, sort_by_version};
use crate::models::vcs_connection::organization_link;
use crate::models::{
    Module, ModuleUpdate, NewModule, OAuthClientLink, Organization, ResourceLink, VcsConnection,
    VcsToken,
};
use crate::services::stores::{
    module_version_not_found, organization_not_found, paginate, vcs_connection_not_found,
    ModuleStore, OrganizationStore, Page, StoreError, VcsConnectionStore,
};

type Item = HashMap<String, AttributeValue>;

const ORGANIZATION_MODULE_INDEX: &str = "organization_module_index";
const CLIENT_ID_INDEX: &str = "client_id_index";
const ORGANIZATION_CONNECTION_INDEX: &str = "organization_connection_index";
const TABLE_READY_ATTEMPTS: usize = 60;
const TABLE_READY_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct DynamoBackend {
    client: DynamoClient,
    table_prefix: String,
}

impl DynamoBackend {
    /// Loads credentials from the default AWS chain. `endpoint` points the
    /// client at DynamoDB Local or another compatible service.
    pub async fn connect(
        region: Option<&str>,
        endpoint: Option<&str>,
        table_prefix: &str,
    ) -> Result<Self, StoreError> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;
        tracing::info!(
            region = ?sdk_config.region().map(|r| r.as_ref().to_string()),
            table_prefix = %table_prefix,
            "Using DynamoDB stores"
        );
        Ok(Self::new(DynamoClient::new(&sdk_config), table_prefix))
    }

    pub fn new(client: DynamoClient, table_prefix: &str) -> Self {
        Self {
            client,
            table_prefix: table_prefix.to_string(),
        }
    }

    fn table(&self, name: &str) -> String {
        format!("{}_{}", self.table_prefix, name)
    }

    pub fn organizations(&self) -> DynamoOrganizationStore {
        DynamoOrganizationStore {
            client: self.client.clone(),
            table: self.table("organizations"),
        }
    }

    pub fn vcs_connections(&self) -> DynamoVcsConnectionStore {
        DynamoVcsConnectionStore {
            client: self.client.clone(),
            table: self.table("vcs_connections"),
        }
    }

    pub fn modules(&self) -> DynamoModuleStore {
        DynamoModuleStore {
            client: self.client.clone(),
            table: self.table("modules"),
            organizations: self.organizations(),
        }
    }
}

fn backend_error<E>(operation: &str, err: E) -> StoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    tracing::error!(operation = %operation, error = %DisplayErrorContext(&err), "DynamoDB request failed");
    StoreError::Backend(anyhow::anyhow!(
        "DynamoDB {} failed: {}",
        operation,
        DisplayErrorContext(&err)
    ))
}

fn s(value: impl Into<String>) -> AttributeValue {
    AttributeValue::S(value.into())
}

fn string_attr(item: &Item, key: &str) -> Result<String, StoreError> {
    item.get(key)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .ok_or_else(|| StoreError::Backend(anyhow::anyhow!("DynamoDB item is missing {}", key)))
}

fn time_attr(item: &Item, key: &str) -> Result<DateTime<Utc>, StoreError> {
    let raw = string_attr(item, key)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(anyhow::anyhow!("invalid {} {}: {}", key, raw, e)))
}

fn attribute(name: &str) -> Result<AttributeDefinition, StoreError> {
    AttributeDefinition::builder()
        .attribute_name(name)
        .attribute_type(ScalarAttributeType::S)
        .build()
        .map_err(|e| backend_error("table definition", e))
}

fn key(name: &str, key_type: KeyType) -> Result<KeySchemaElement, StoreError> {
    KeySchemaElement::builder()
        .attribute_name(name)
        .key_type(key_type)
        .build()
        .map_err(|e| backend_error("table definition", e))
}

fn index(name: &str, keys: Vec<KeySchemaElement>) -> Result<GlobalSecondaryIndex, StoreError> {
    GlobalSecondaryIndex::builder()
        .index_name(name)
        .set_key_schema(Some(keys))
        .projection(
            Projection::builder()
                .projection_type(ProjectionType::All)
                .build(),
        )
        .build()
        .map_err(|e| backend_error("table definition", e))
}

/// Shape of one table: attribute definitions, primary key and indexes.
struct TableSchema {
    attributes: Vec<AttributeDefinition>,
    keys: Vec<KeySchemaElement>,
    indexes: Vec<GlobalSecondaryIndex>,
}

/// Creates `table` when it does not exist yet and waits until it is active.
async fn ensure_table(
    client: &DynamoClient,
    table: &str,
    schema: TableSchema,
) -> Result<(), StoreError> {
    match client.describe_table().table_name(table).send().await {
        Ok(_) => {
            tracing::info!(table = %table, "Ensured DynamoDB table");
            return Ok(());
        }
        Err(e)
            if e
                .as_service_error()
                .map(|se| se.is_resource_not_found_exception())
                .unwrap_or(false) => {}
        Err(e) => return Err(backend_error("describe_table", e)),
    }

    tracing::info!(table = %table, "Creating DynamoDB table");
    let mut request = client
        .create_table()
        .table_name(table)
        .billing_mode(BillingMode::PayPerRequest)
        .set_attribute_definitions(Some(schema.attributes))
        .set_key_schema(Some(schema.keys));
    if !schema.indexes.is_empty() {
        request = request.set_global_secondary_indexes(Some(schema.indexes));
    }
    request
        .send()
        .await
        .map_err(|e| backend_error("create_table", e))?;

    for _ in 0..TABLE_READY_ATTEMPTS {
        let output = client
            .describe_table()
            .table_name(table)
            .send()
            .await
            .map_err(|e| backend_error("describe_table", e))?;
        if output.table().and_then(|t| t.table_status()) == Some(&TableStatus::Active) {
            return Ok(());
        }
        tokio::time::sleep(TABLE_READY_INTERVAL).await;
    }
    Err(StoreError::Backend(anyhow::anyhow!(
        "DynamoDB table {} did not become active",
        table
    )))
}

async fn scan_table(client: &DynamoClient, table: &str) -> Result<Vec<Item>, StoreError> {
    client
        .scan()
        .table_name(table)
        .into_paginator()
        .items()
        .send()
        .collect::<Result<Vec<_>, _>>()
        .await
        .map_err(|e| backend_error("scan", e))
}

/// All items whose `attribute` equals `value`, on the table or one of its indexes.
async fn query_eq(
    client: &DynamoClient,
    table: &str,
    index: Option<&str>,
    attribute: &str,
    value: &str,
) -> Result<Vec<Item>, StoreError> {
    client
        .query()
        .table_name(table)
        .set_index_name(index.map(str::to_string))
        .key_condition_expression("#k = :v")
        .expression_attribute_names("#k", attribute)
        .expression_attribute_values(":v", s(value))
        .into_paginator()
        .items()
        .send()
        .collect::<Result<Vec<_>, _>>()
        .await
        .map_err(|e| backend_error("query", e))
}

async fn get_item(
    client: &DynamoClient,
    table: &str,
    key: (&str, AttributeValue),
    sort_key: Option<(&str, AttributeValue)>,
) -> Result<Option<Item>, StoreError> {
    let mut request = client
        .get_item()
        .table_name(table)
        .consistent_read(true)
        .key(key.0, key.1);
    if let Some((name, value)) = sort_key {
        request = request.key(name, value);
    }
    let output = request
        .send()
        .await
        .map_err(|e| backend_error("get_item", e))?;
    Ok(output.item().cloned())
}

fn organization_item(org: &Organization) -> Item {
    HashMap::from([
        ("id".to_string(), s(&org.id)),
        ("name".to_string(), s(&org.name)),
        ("email".to_string(), s(&org.email)),
        ("created_on".to_string(), s(org.created_on.to_rfc3339())),
    ])
}

fn organization_from_item(item: &Item) -> Result<Organization, StoreError> {
    Ok(Organization {
        id: string_attr(item, "id")?,
        name: string_attr(item, "name")?,
        email: string_attr(item, "email")?,
        created_on: time_attr(item, "created_on")?,
    })
}

#[derive(Clone)]
pub struct DynamoOrganizationStore {
    client: DynamoClient,
    table: String,
}

impl DynamoOrganizationStore {
    async fn exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(get_item(&self.client, &self.table, ("name", s(name)), None)
            .await?
            .is_some())
    }
}

#[async_trait]
impl OrganizationStore for DynamoOrganizationStore {
    async fn init(&self) -> Result<(), StoreError> {
        ensure_table(
            &self.client,
            &self.table,
            TableSchema {
                attributes: vec![attribute("name")?],
                keys: vec![key("name", KeyType::Hash)?],
                indexes: Vec::new(),
            },
        )
        .await
    }

    async fn create(&self, name: &str, email: &str) -> Result<Organization, StoreError> {
        let org = Organization::new(name, email);
        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(organization_item(&org)))
            .condition_expression("attribute_not_exists(#n)")
            .expression_attribute_names("#n", "name")
            .send()
            .await
            .map_err(|e| {
                if e
                    .as_service_error()
                    .map(|se| se.is_conditional_check_failed_exception())
                    .unwrap_or(false)
                {
                    StoreError::DuplicateKey(format!("organization {} already exists", name))
                } else {
                    backend_error("put_item", e)
                }
            })?;
        Ok(org)
    }

    async fn read_all(&self, page: Page) -> Result<Vec<Organization>, StoreError> {
        let mut orgs = scan_table(&self.client, &self.table)
            .await?
            .iter()
            .map(organization_from_item)
            .collect::<Result<Vec<_>, _>>()?;
        orgs.sort_by(|a, b| a.created_on.cmp(&b.created_on).then_with(|| a.name.cmp(&b.name)));
        Ok(paginate(orgs, page))
    }

    async fn read_one(&self, name: &str) -> Result<Organization, StoreError> {
        get_item(&self.client, &self.table, ("name", s(name)), None)
            .await?
            .as_ref()
            .map(organization_from_item)
            .transpose()?
            .ok_or_else(organization_not_found)
    }

    async fn update(&self, name: &str, email: &str) -> Result<Organization, StoreError> {
        if email.is_empty() {
            return self.read_one(name).await;
        }
        let output = self
            .client
            .update_item()
            .table_name(&self.table)
            .key("name", s(name))
            .update_expression("SET #e = :e")
            .condition_expression("attribute_exists(#n)")
            .expression_attribute_names("#e", "email")
            .expression_attribute_names("#n", "name")
            .expression_attribute_values(":e", s(email))
            .return_values(ReturnValue::AllNew)
            .send()
            .await
            .map_err(|e| {
                if e
                    .as_service_error()
                    .map(|se| se.is_conditional_check_failed_exception())
                    .unwrap_or(false)
                {
                    organization_not_found()
                } else {
                    backend_error("update_item", e)
                }
            })?;
        output
            .attributes()
            .map(organization_from_item)
            .transpose()?
            .ok_or_else(organization_not_found)
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.client
            .delete_item()
            .table_name(&self.table)
            .key("name", s(name))
            .send()
            .await
            .map_err(|e| backend_error("delete_item", e))?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "dynamo"
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.client
            .describe_table()
            .table_name(&self.table)
            .send()
            .await
            .map_err(|e| backend_error("describe_table", e))?;
        Ok(())
    }
}

fn module_partition(org: &str, name: &str, provider: &str) -> String {
    format!("{}/{}/{}", org, name, provider)
}

fn module_item(module: &Module) -> Item {
    HashMap::from([
        (
            "module".to_string(),
            s(module_partition(&module.organization, &module.name, &module.provider)),
        ),
        ("version".to_string(), s(&module.version)),
        ("id".to_string(), s(&module.id)),
        ("organization".to_string(), s(&module.organization)),
        ("name".to_string(), s(&module.name)),
        ("provider".to_string(), s(&module.provider)),
        ("description".to_string(), s(&module.description)),
        ("source".to_string(), s(&module.source)),
        ("created_on".to_string(), s(module.created_on.to_rfc3339())),
    ])
}

fn module_from_item(item: &Item) -> Result<Module, StoreError> {
    Ok(Module {
        id: string_attr(item, "id")?,
        organization: string_attr(item, "organization")?,
        name: string_attr(item, "name")?,
        provider: string_attr(item, "provider")?,
        version: string_attr(item, "version")?,
        description: string_attr(item, "description").unwrap_or_default(),
        source: string_attr(item, "source")?,
        created_on: time_attr(item, "created_on")?,
    })
}

fn modules_from_items(items: &[Item]) -> Result<Vec<Module>, StoreError> {
    let mut modules = items
        .iter()
        .map(module_from_item)
        .collect::<Result<Vec<_>, _>>()?;
    modules.sort_by(|a, b| a.created_on.cmp(&b.created_on).then_with(|| a.id.cmp(&b.id)));
    Ok(modules)
}

#[derive(Clone)]
pub struct DynamoModuleStore {
    client: DynamoClient,
    table: String,
    organizations: DynamoOrganizationStore,
}

impl DynamoModuleStore {
    async fn versions(&self, org: &str, name: &str, provider: &str) -> Result<Vec<Module>, StoreError> {
        let items = query_eq(
            &self.client,
            &self.table,
            None,
            "module",
            &module_partition(org, name, provider),
        )
        .await?;
        modules_from_items(&items)
    }
}

#[async_trait]
impl ModuleStore for DynamoModuleStore {
    async fn init(&self) -> Result<(), StoreError> {
        ensure_table(
            &self.client,
            &self.table,
            TableSchema {
                attributes: vec![
                    attribute("module")?,
                    attribute("version")?,
                    attribute("organization")?,
                ],
                keys: vec![key("module", KeyType::Hash)?, key("version", KeyType::Range)?],
                indexes: vec![index(
                    ORGANIZATION_MODULE_INDEX,
                    vec![
                        key("organization", KeyType::Hash)?,
                        key("module", KeyType::Range)?,
                    ],
                )?],
            },
        )
        .await
    }

    async fn read_all(&self, page: Page) -> Result<Vec<Module>, StoreError> {
        let items = scan_table(&self.client, &self.table).await?;
        Ok(paginate(modules_from_items(&items)?, page))
    }

    async fn read_organization_modules(
        &self,
        org: &str,
        page: Page,
    ) -> Result<Option<Vec<Module>>, StoreError> {
        if !self.organizations.exists(org).await? {
            return Ok(None);
        }
        let items = query_eq(
            &self.client,
            &self.table,
            Some(ORGANIZATION_MODULE_INDEX),
            "organization",
            org,
        )
        .await?;
        Ok(Some(paginate(modules_from_items(&items)?, page)))
    }

    async fn read_module_versions(
        &self,
        org: &str,
        name: &str,
        provider: &str,
    ) -> Result<Option<Vec<Module>>, StoreError> {
        if !self.organizations.exists(org).await? {
            return Ok(None);
        }
        let mut versions = self.versions(org, name, provider).await?;
        sort_by_version(&mut versions);
        Ok(Some(versions))
    }

    async fn read_one(
        &self,
        org: &str,
        name: &str,
        provider: &str,
        version: Option<&str>,
    ) -> Result<Module, StoreError> {
        let module = match version {
            Some(version) => get_item(
                &self.client,
                &self.table,
                ("module", s(module_partition(org, name, provider))),
                Some(("version", s(version))),
            )
            .await?
            .as_ref()
            .map(module_from_item)
            .transpose()?,
            None => latest(self.versions(org, name, provider).await?),
        };
        module.ok_or_else(module_version_not_found)
    }

    async fn read_module_version_source(
        &self,
        org: &str,
        name: &str,
        provider: &str,
        version: &str,
    ) -> Result<String, StoreError> {
        self.read_one(org, name, provider, Some(version))
            .await
            .map(|m| m.source)
    }

    fn backend_type(&self) -> &'static str {
        "dynamo"
    }

    async fn create(&self, module: NewModule) -> Result<Module, StoreError> {
        if !self.organizations.exists(&module.organization).await? {
            return Err(organization_not_found());
        }
        let module = Module::from_new(module);
        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(module_item(&module)))
            .condition_expression("attribute_not_exists(#m)")
            .expression_attribute_names("#m", "module")
            .send()
            .await
            .map_err(|e| {
                if e
                    .as_service_error()
                    .map(|se| se.is_conditional_check_failed_exception())
                    .unwrap_or(false)
                {
                    StoreError::DuplicateKey("module version already exists".to_string())
                } else {
                    backend_error("put_item", e)
                }
            })?;
        Ok(module)
    }

    async fn update(
        &self,
        org: &str,
        name: &str,
        provider: &str,
        version: &str,
        update: ModuleUpdate,
    ) -> Result<Module, StoreError> {
        let mut existing = self.read_one(org, name, provider, Some(version)).await?;
        existing.apply(update);
        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(module_item(&existing)))
            .condition_expression("attribute_exists(#m)")
            .expression_attribute_names("#m", "module")
            .send()
            .await
            .map_err(|e| {
                if e
                    .as_service_error()
                    .map(|se| se.is_conditional_check_failed_exception())
                    .unwrap_or(false)
                {
                    module_version_not_found()
                } else {
                    backend_error("put_item", e)
                }
            })?;
        Ok(existing)
    }

    async fn delete(
        &self,
        org: &str,
        name: &str,
        provider: &str,
        version: &str,
    ) -> Result<(), StoreError> {
        self.client
            .delete_item()
            .table_name(&self.table)
            .key("module", s(module_partition(org, name, provider)))
            .key("version", s(version))
            .send()
            .await
            .map_err(|e| backend_error("delete_item", e))?;
        Ok(())
    }
}

/// The OAuth settings, secret and token included, are kept as one JSON
/// attribute; `client_id` and `organization_id` are copied out for the indexes.
fn connection_item(conn: &VcsConnection) -> Result<Item, StoreError> {
    let oauth = serde_json::to_string(&conn.oauth)
        .map_err(|e| StoreError::Backend(anyhow::Error::new(e)))?;
    Ok(HashMap::from([
        ("id".to_string(), s(&conn.id)),
        ("client_id".to_string(), s(&conn.oauth.client_id)),
        ("organization_id".to_string(), s(&conn.organization.id)),
        ("organization_link".to_string(), s(&conn.organization.link)),
        ("oauth".to_string(), s(oauth)),
    ]))
}

fn connection_from_item(item: &Item) -> Result<VcsConnection, StoreError> {
    let oauth: OAuthClientLink = serde_json::from_str(&string_attr(item, "oauth")?)
        .map_err(|e| StoreError::Backend(anyhow::anyhow!("invalid oauth attribute: {}", e)))?;
    Ok(VcsConnection {
        id: string_attr(item, "id")?,
        organization: ResourceLink {
            id: string_attr(item, "organization_id")?,
            link: string_attr(item, "organization_link")?,
        },
        oauth,
    })
}

fn connections_from_items(items: &[Item]) -> Result<Vec<VcsConnection>, StoreError> {
    let mut conns = items
        .iter()
        .map(connection_from_item)
        .map(|conn| conn.map(without_token))
        .collect::<Result<Vec<_>, _>>()?;
    conns.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(conns)
}

fn without_token(mut conn: VcsConnection) -> VcsConnection {
    conn.oauth.token = None;
    conn
}

#[derive(Clone)]
pub struct DynamoVcsConnectionStore {
    client: DynamoClient,
    table: String,
}

impl DynamoVcsConnectionStore {
    async fn by_client_id(&self, client_id: &str) -> Result<Vec<VcsConnection>, StoreError> {
        query_eq(
            &self.client,
            &self.table,
            Some(CLIENT_ID_INDEX),
            "client_id",
            client_id,
        )
        .await?
        .iter()
        .map(connection_from_item)
        .collect()
    }

    /// Writes `conn` over an existing record. A vanished record is `NotFound`.
    async fn replace(&self, conn: &VcsConnection) -> Result<(), StoreError> {
        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(connection_item(conn)?))
            .condition_expression("attribute_exists(#i)")
            .expression_attribute_names("#i", "id")
            .send()
            .await
            .map_err(|e| {
                if e
                    .as_service_error()
                    .map(|se| se.is_conditional_check_failed_exception())
                    .unwrap_or(false)
                {
                    vcs_connection_not_found()
                } else {
                    backend_error("put_item", e)
                }
            })?;
        Ok(())
    }
}

fn duplicate_client_id(client_id: &str) -> StoreError {
    StoreError::DuplicateKey(format!(
        "vcs connection for client_id {} already exists",
        client_id
    ))
}

#[async_trait]
impl VcsConnectionStore for DynamoVcsConnectionStore {
    async fn init(&self) -> Result<(), StoreError> {
        ensure_table(
            &self.client,
            &self.table,
            TableSchema {
                attributes: vec![
                    attribute("id")?,
                    attribute("client_id")?,
                    attribute("organization_id")?,
                ],
                keys: vec![key("id", KeyType::Hash)?],
                indexes: vec![
                    index(CLIENT_ID_INDEX, vec![key("client_id", KeyType::Hash)?])?,
                    index(
                        ORGANIZATION_CONNECTION_INDEX,
                        vec![key("organization_id", KeyType::Hash)?],
                    )?,
                ],
            },
        )
        .await
    }

    // The client_id check reads an index, so two concurrent creates with the
    // same client_id can both pass it.
    async fn create(
        &self,
        org_id: &str,
        org_name: &str,
        link: OAuthClientLink,
    ) -> Result<VcsConnection, StoreError> {
        if !self.by_client_id(&link.client_id).await?.is_empty() {
            return Err(duplicate_client_id(&link.client_id));
        }
        let conn = VcsConnection::new(org_id, org_name, link);
        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(connection_item(&conn)?))
            .condition_expression("attribute_not_exists(#i)")
            .expression_attribute_names("#i", "id")
            .send()
            .await
            .map_err(|e| backend_error("put_item", e))?;
        Ok(conn)
    }

    async fn read_all(&self, page: Page) -> Result<Vec<VcsConnection>, StoreError> {
        let items = scan_table(&self.client, &self.table).await?;
        Ok(paginate(connections_from_items(&items)?, page))
    }

    async fn read_organization_connections(
        &self,
        org_id: &str,
        page: Page,
    ) -> Result<Vec<VcsConnection>, StoreError> {
        let items = query_eq(
            &self.client,
            &self.table,
            Some(ORGANIZATION_CONNECTION_INDEX),
            "organization_id",
            org_id,
        )
        .await?;
        Ok(paginate(connections_from_items(&items)?, page))
    }

    async fn read_one(
        &self,
        id: &str,
        include_tokens: bool,
    ) -> Result<VcsConnection, StoreError> {
        let conn = get_item(&self.client, &self.table, ("id", s(id)), None)
            .await?
            .as_ref()
            .map(connection_from_item)
            .transpose()?
            .ok_or_else(vcs_connection_not_found)?;
        Ok(if include_tokens {
            conn
        } else {
            without_token(conn)
        })
    }

    async fn update(
        &self,
        id: &str,
        org_id: &str,
        org_name: &str,
        mut link: OAuthClientLink,
    ) -> Result<VcsConnection, StoreError> {
        let existing = self.read_one(id, true).await?;
        if link.client_id != existing.oauth.client_id
            && self
                .by_client_id(&link.client_id)
                .await?
                .iter()
                .any(|c| c.id != id)
        {
            return Err(duplicate_client_id(&link.client_id));
        }

        link.callback_uri = existing.oauth.callback_uri;
        link.token = existing.oauth.token;
        let conn = VcsConnection {
            id: existing.id,
            organization: organization_link(org_id, org_name),
            oauth: link,
        };
        self.replace(&conn).await?;
        Ok(without_token(conn))
    }

    async fn update_vcs_token(&self, client_id: &str, token: VcsToken) -> Result<(), StoreError> {
        let mut conn = self
            .by_client_id(client_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(vcs_connection_not_found)?;
        conn.oauth.token = Some(token);
        self.replace(&conn).await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.client
            .delete_item()
            .table_name(&self.table)
            .key("id", s(id))
            .send()
            .await
            .map_err(|e| backend_error("delete_item", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn github_link(client_id: &str) -> OAuthClientLink {
        OAuthClientLink {
            service_provider: "github".to_string(),
            http_uri: "https://github.com".to_string(),
            api_uri: "https://api.github.com".to_string(),
            client_id: client_id.to_string(),
            client_secret: "shh".to_string(),
            callback_uri: String::new(),
            token: None,
        }
    }

    #[test]
    fn module_items_are_keyed_by_module_and_version() {
        let module = Module::from_new(NewModule {
            organization: "acme".to_string(),
            name: "vpc".to_string(),
            provider: "aws".to_string(),
            version: "1.2.0".to_string(),
            description: "network".to_string(),
            source: "acme/vpc/aws/1.2.0.zip".to_string(),
        });
        let item = module_item(&module);
        assert_eq!(item["module"], s("acme/vpc/aws"));
        assert_eq!(item["version"], s("1.2.0"));
        assert_eq!(module_from_item(&item).unwrap(), module);
    }

    #[test]
    fn connection_items_keep_secrets_out_of_index_attributes() {
        let mut conn = VcsConnection::new("org-1", "acme", github_link("client-1"));
        conn.oauth.token = Some(VcsToken {
            access_token: "gho_secret".to_string(),
            ..Default::default()
        });
        let item = connection_item(&conn).unwrap();
        assert_eq!(item["client_id"], s("client-1"));
        assert_eq!(item["organization_id"], s("org-1"));
        assert_eq!(connection_from_item(&item).unwrap(), conn);
        assert!(connections_from_items(&[item]).unwrap()[0]
            .oauth
            .token
            .is_none());
    }

    #[test]
    fn missing_attribute_is_backend_error() {
        let mut item = organization_item(&Organization::new("acme", "ops@acme.io"));
        item.remove("email");
        assert!(matches!(
            organization_from_item(&item),
            Err(StoreError::Backend(_))
        ));
    }

    async fn backend() -> DynamoBackend {
        let endpoint = std::env::var("DYNAMODB_ENDPOINT")
            .unwrap_or_else(|_| "http://localhost:8000".to_string());
        let prefix = format!("terrarium_test_{}", uuid::Uuid::new_v4().simple());
        let backend = DynamoBackend::connect(Some("us-east-1"), Some(&endpoint), &prefix)
            .await
            .unwrap();
        backend.organizations().init().await.unwrap();
        backend.vcs_connections().init().await.unwrap();
        backend.modules().init().await.unwrap();
        backend
    }

    async fn drop_tables(backend: &DynamoBackend) {
        for table in ["organizations", "vcs_connections", "modules"] {
            backend
                .client
                .delete_table()
                .table_name(backend.table(table))
                .send()
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    #[ignore] // Requires DynamoDB Local
    async fn duplicate_organization_is_duplicate_key() {
        let dynamo = backend().await;
        let orgs = dynamo.organizations();
        orgs.create("acme", "ops@acme.io").await.unwrap();
        assert!(matches!(
            orgs.create("acme", "ops@acme.io").await,
            Err(StoreError::DuplicateKey(_))
        ));
        assert_eq!(orgs.read_all(Page::all()).await.unwrap().len(), 1);
        drop_tables(&dynamo).await;
    }

    #[tokio::test]
    #[ignore] // Requires DynamoDB Local
    async fn versions_distinguish_missing_org_and_reject_duplicates() {
        let dynamo = backend().await;
        let modules = dynamo.modules();
        assert!(modules
            .read_module_versions("acme", "vpc", "aws")
            .await
            .unwrap()
            .is_none());
        dynamo
            .organizations()
            .create("acme", "ops@acme.io")
            .await
            .unwrap();
        assert_eq!(
            modules.read_module_versions("acme", "vpc", "aws").await.unwrap(),
            Some(vec![])
        );

        let new = |version: &str| NewModule {
            organization: "acme".to_string(),
            name: "vpc".to_string(),
            provider: "aws".to_string(),
            version: version.to_string(),
            description: String::new(),
            source: format!("acme/vpc/aws/{}.zip", version),
        };
        modules.create(new("1.10.0")).await.unwrap();
        modules.create(new("1.2.0")).await.unwrap();
        assert!(matches!(
            modules.create(new("1.2.0")).await,
            Err(StoreError::DuplicateKey(_))
        ));
        let versions: Vec<_> = modules
            .read_module_versions("acme", "vpc", "aws")
            .await
            .unwrap()
            .unwrap()
            .into_iter()
            .map(|m| m.version)
            .collect();
        assert_eq!(versions, vec!["1.2.0", "1.10.0"]);
        assert_eq!(
            modules
                .read_organization_modules("acme", Page::all())
                .await
                .unwrap()
                .unwrap()
                .len(),
            2
        );
        drop_tables(&dynamo).await;
    }

    #[tokio::test]
    #[ignore] // Requires DynamoDB Local
    async fn token_updates_are_keyed_by_client_id() {
        let dynamo = backend().await;
        let vcs = dynamo.vcs_connections();
        let conn = vcs
            .create("org-1", "acme", github_link("client-1"))
            .await
            .unwrap();
        assert!(matches!(
            vcs.create("org-1", "acme", github_link("client-1")).await,
            Err(StoreError::DuplicateKey(_))
        ));
        vcs.update_vcs_token(
            "client-1",
            VcsToken {
                access_token: "gho_new".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(
            vcs.read_one(&conn.id, true).await.unwrap().access_token(),
            Some("gho_new")
        );
        assert!(vcs.read_one(&conn.id, false).await.unwrap().oauth.token.is_none());
        drop_tables(&dynamo).await;
    }
}
