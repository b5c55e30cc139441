//! Command execution against a `CacheManager`

use crate::Command;
use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sessioncache_engine::{CacheManager, EngineConfig, SearchQuery, SetOptions, Temperature};
use std::path::Path;
use std::time::Duration;

/// Open the cache described by `config_path` and run one command
pub async fn run(config_path: &Path, ephemeral: bool, command: Command) -> anyhow::Result<()> {
    let config = EngineConfig::load_or_default(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let cache: CacheManager<Value> = if ephemeral {
        CacheManager::in_memory(config)?
    } else {
        CacheManager::new(config)?
    };

    let result = execute(&cache, command).await;
    cache.destroy().await?;
    result
}

async fn execute(cache: &CacheManager<Value>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Get { key, history } => {
            let value = if history {
                cache.get_history(&key).await
            } else {
                cache.get(&key).await
            };
            match value {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => bail!("{}: not found", key),
            }
        }
        Command::Set {
            key,
            value,
            temperature,
            ttl_secs,
        } => {
            let mut options = SetOptions::new();
            if let Some(temperature) = temperature {
                options = options.temperature(temperature.parse::<Temperature>()?);
            }
            if let Some(secs) = ttl_secs {
                options = options.ttl(Duration::from_secs(secs));
            }
            cache.set(&key, parse_value(&value), options).await?;
            println!("{} ({})", key, cache.get_temperature(&key).await);
        }
        Command::Delete { key } => {
            if !cache.delete(&key).await? {
                bail!("{}: not found", key);
            }
        }
        Command::Temperature { key } => {
            println!("{}", cache.get_temperature(&key).await);
        }
        Command::Search {
            text,
            agent,
            tag,
            since,
            until,
            limit,
        } => {
            let mut query = SearchQuery::new();
            if let Some(text) = text {
                query = query.text(text);
            }
            if let Some(agent) = agent {
                query = query.agent(agent);
            }
            if let Some(tag) = tag {
                query = query.tag(tag);
            }
            if since.is_some() || until.is_some() {
                let start = match since {
                    Some(s) => parse_time(&s)?,
                    None => DateTime::<Utc>::MIN_UTC,
                };
                let end = match until {
                    Some(s) => parse_time(&s)?,
                    None => Utc::now(),
                };
                query = query.between(start, end);
            }
            if let Some(limit) = limit {
                query = query.limit(limit);
            }
            for hit in cache.search(&query).await {
                println!("{:>4}  {:<10}  {}", hit.score, hit.tier.as_str(), hit.key);
            }
        }
        Command::List { prefix, limit } => {
            for key in cache.list(&prefix, limit).await {
                println!("{}", key);
            }
        }
        Command::Stats => {
            let stats = cache.get_usage_stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Cleanup => {
            let removed = cache.cleanup().await?;
            println!("removed {} expired entries", removed);
        }
        Command::Optimize => {
            let report = cache.optimize().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Preload { keys } => {
            let loaded = cache.preload(keys).await;
            println!("preloaded {} entries", loaded);
        }
    }
    Ok(())
}

/// JSON if it parses, a plain string otherwise
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_time(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid timestamp: {}", raw))?;
    Ok(parsed.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value(r#"{"a": 1}"#), json!({"a": 1}));
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("hello"), json!("hello"));
    }

    #[test]
    fn test_parse_time() {
        let at = parse_time("2024-05-01T12:00:00Z").unwrap();
        assert_eq!(at.timestamp(), 1_714_564_800);
        assert!(parse_time("yesterday").is_err());
    }

    #[tokio::test]
    async fn test_execute_set_then_get() {
        let cache: CacheManager<Value> = CacheManager::in_memory(EngineConfig::minimal()).unwrap();
        execute(
            &cache,
            Command::Set {
                key: "k".into(),
                value: r#"{"title": "Invoice"}"#.into(),
                temperature: Some("cold".into()),
                ttl_secs: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(cache.get_temperature("k").await, Temperature::Warm);

        execute(&cache, Command::Get { key: "k".into(), history: false }).await.unwrap();
        assert!(execute(&cache, Command::Get { key: "x".into(), history: false }).await.is_err());
        assert!(execute(&cache, Command::Delete { key: "k".into() }).await.is_ok());
        assert!(execute(&cache, Command::Delete { key: "k".into() }).await.is_err());
    }
}
