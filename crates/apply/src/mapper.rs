//! Declared app runtime blocks <-> remote app representation. Pure functions.

use plinth_core::{
    AppRuntimeBlock, DispatchRule, FeatureSettingsBlock, ReconcileError, ReconcileResult, RemoteApp,
    RemoteFeatureSettings, UrlDispatchRule,
};

/// Declared blocks -> create request. `Ok(None)` when nothing is declared.
pub fn expand(project_id: &str, blocks: &[AppRuntimeBlock]) -> ReconcileResult<Option<RemoteApp>> {
    let block = match blocks {
        [] => return Ok(None),
        [b] => b,
        _ => return Err(ReconcileError::Mapping("only one app_runtime block may be defined per project".into())),
    };
    Ok(Some(RemoteApp {
        id: project_id.to_string(),
        auth_domain: block.auth_domain.clone(),
        location_id: block.location_id.clone(),
        serving_status: block.serving_status.clone(),
        feature_settings: expand_feature_settings(&block.feature_settings)?,
        ..Default::default()
    }))
}

fn expand_feature_settings(blocks: &[FeatureSettingsBlock]) -> ReconcileResult<Option<RemoteFeatureSettings>> {
    match blocks {
        [] => Ok(None),
        // Always sent, so that `false` really disables the setting.
        [b] => Ok(Some(RemoteFeatureSettings { split_health_checks: Some(b.split_health_checks) })),
        _ => Err(ReconcileError::Mapping("only one feature_settings block may be defined per app".into())),
    }
}

/// Remote app -> declared-shape block, including the read-only fields.
pub fn flatten(app: &RemoteApp) -> AppRuntimeBlock {
    AppRuntimeBlock {
        auth_domain: app.auth_domain.clone(),
        location_id: app.location_id.clone(),
        serving_status: app.serving_status.clone(),
        feature_settings: flatten_feature_settings(app.feature_settings.as_ref()),
        name: app.name.clone(),
        code_bucket: app.code_bucket.clone(),
        default_hostname: app.default_hostname.clone(),
        default_bucket: app.default_bucket.clone(),
        gcr_domain: app.gcr_domain.clone(),
        dispatch_rules: flatten_dispatch_rules(&app.dispatch_rules),
    }
}

fn flatten_feature_settings(settings: Option<&RemoteFeatureSettings>) -> Vec<FeatureSettingsBlock> {
    match settings {
        None => Vec::new(),
        Some(s) => vec![FeatureSettingsBlock { split_health_checks: s.split_health_checks.unwrap_or(false) }],
    }
}

fn flatten_dispatch_rules(rules: &[UrlDispatchRule]) -> Vec<DispatchRule> {
    rules
        .iter()
        .map(|r| DispatchRule { domain: r.domain.clone(), path: r.path.clone(), service: r.service.clone() })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(split: Option<bool>) -> AppRuntimeBlock {
        AppRuntimeBlock {
            auth_domain: "example.com".into(),
            location_id: "us-central".into(),
            serving_status: "SERVING".into(),
            feature_settings: split.map(|s| vec![FeatureSettingsBlock { split_health_checks: s }]).unwrap_or_default(),
            ..Default::default()
        }
    }

    #[test]
    fn nothing_declared_expands_to_none() {
        assert!(expand("demo-project", &[]).unwrap().is_none());
    }

    #[test]
    fn expand_sets_id_and_sends_false_explicitly() {
        let app = expand("demo-project", &[block(Some(false))]).unwrap().unwrap();
        assert_eq!(app.id, "demo-project");
        let body = serde_json::to_value(&app).unwrap();
        assert_eq!(body["featureSettings"]["splitHealthChecks"], serde_json::json!(false));
        assert_eq!(body["locationId"], "us-central");
        assert!(body.get("defaultHostname").is_none());
    }

    #[test]
    fn multiple_blocks_are_mapping_errors() {
        let err = expand("demo-project", &[block(None), block(None)]).unwrap_err();
        assert!(matches!(err, ReconcileError::Mapping(_)));

        let mut b = block(Some(true));
        b.feature_settings.push(FeatureSettingsBlock { split_health_checks: false });
        let err = expand("demo-project", &[b]).unwrap_err();
        assert!(matches!(err, ReconcileError::Mapping(_)));
    }

    #[test]
    fn flatten_of_expand_keeps_mutable_fields() {
        for x in [block(None), block(Some(true)), block(Some(false))] {
            let app = expand("demo-project", std::slice::from_ref(&x)).unwrap().unwrap();
            assert_eq!(flatten(&app).mutable_part(), x.mutable_part());
        }
    }

    #[test]
    fn expand_of_flatten_keeps_mutable_remote_fields() {
        let remote = RemoteApp {
            id: "demo-project".into(),
            name: "apps/demo-project".into(),
            auth_domain: "example.com".into(),
            location_id: "europe-west".into(),
            serving_status: "USER_DISABLED".into(),
            default_hostname: "demo-project.appspot.com".into(),
            feature_settings: Some(RemoteFeatureSettings { split_health_checks: Some(true) }),
            ..Default::default()
        };
        let back = expand("demo-project", &[flatten(&remote)]).unwrap().unwrap();
        assert_eq!(back.auth_domain, remote.auth_domain);
        assert_eq!(back.location_id, remote.location_id);
        assert_eq!(back.serving_status, remote.serving_status);
        assert_eq!(back.feature_settings, remote.feature_settings);
        assert!(back.default_hostname.is_empty());
    }

    #[test]
    fn flatten_keeps_dispatch_order_and_absent_settings() {
        let remote = RemoteApp {
            dispatch_rules: vec![
                UrlDispatchRule { domain: "*".into(), path: "/api/*".into(), service: "api".into() },
                UrlDispatchRule { domain: "*".into(), path: "/*".into(), service: "default".into() },
            ],
            ..Default::default()
        };
        let b = flatten(&remote);
        assert!(b.feature_settings.is_empty());
        let services: Vec<_> = b.dispatch_rules.iter().map(|r| r.service.as_str()).collect();
        assert_eq!(services, vec!["api", "default"]);
    }
}
