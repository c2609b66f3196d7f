use std::collections::HashSet;

use chrono::format::{Item, StrftimeItems};

use super::{
    FilterKind, ForwarderConfig, InputKind, InputSpec, OutputKind, PipelineSpec,
    SelectorOperator, inputs::NamespaceContainerSpec,
};
use crate::event::FieldPath;

/// Fields every record keeps regardless of `prune` filters.
pub(crate) const REQUIRED_FIELDS: [&str; 4] = ["@timestamp", "message", "log_type", "log_source"];

/// Checks the whole document and returns every problem found rather than the first one.
///
/// On success the returned list holds warnings about things that are legal but probably wrong.
pub fn validate(config: &ForwarderConfig) -> Result<Vec<String>, Vec<String>> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    check_inputs(config, &mut errors);
    check_outputs(config, &mut errors);
    check_filters(config, &mut errors);
    check_pipelines(config, &mut errors, &mut warnings);

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(errors)
    }
}

fn check_unique<'a>(
    kind: &str,
    names: impl Iterator<Item = &'a str>,
    errors: &mut Vec<String>,
) {
    let mut seen = HashSet::new();
    for name in names {
        if name.is_empty() {
            errors.push(format!("{kind} with an empty name"));
        } else if !seen.insert(name) {
            errors.push(format!("duplicate {kind} name {name:?}"));
        }
    }
}

fn check_inputs(config: &ForwarderConfig, errors: &mut Vec<String>) {
    check_unique(
        "input",
        config.inputs.iter().map(|input| input.name.as_str()),
        errors,
    );

    for input in &config.inputs {
        if InputSpec::is_reserved_name(&input.name) {
            errors.push(format!(
                "input {:?}: name is reserved for the built-in input",
                input.name
            ));
        }
        let InputKind::Application { application } = &input.kind else {
            continue;
        };
        for spec in application.includes.iter().chain(&application.excludes) {
            check_globs(&input.name, spec, errors);
        }
        if let Some(selector) = &application.selector {
            for requirement in &selector.match_expressions {
                let needs_values = matches!(
                    requirement.operator,
                    SelectorOperator::In | SelectorOperator::NotIn
                );
                if needs_values == requirement.values.is_empty() {
                    errors.push(format!(
                        "input {:?}: matchExpressions key {:?} with operator {:?} {}",
                        input.name,
                        requirement.key,
                        requirement.operator,
                        if needs_values {
                            "requires values"
                        } else {
                            "must not have values"
                        }
                    ));
                }
            }
        }
        if let Some(limit) = application
            .tuning
            .as_ref()
            .and_then(|tuning| tuning.rate_limit_per_container)
        {
            if limit.max_records_per_second == 0 {
                errors.push(format!(
                    "input {:?}: rateLimitPerContainer.maxRecordsPerSecond must be positive",
                    input.name
                ));
            }
        }
    }
}

fn check_globs(input: &str, spec: &NamespaceContainerSpec, errors: &mut Vec<String>) {
    for pattern in [&spec.namespace, &spec.container].into_iter().flatten() {
        if let Err(error) = glob::Pattern::new(pattern) {
            errors.push(format!("input {input:?}: invalid glob {pattern:?}: {error}"));
        }
    }
}

fn check_outputs(config: &ForwarderConfig, errors: &mut Vec<String>) {
    check_unique(
        "output",
        config.outputs.iter().map(|output| output.name.as_str()),
        errors,
    );

    for output in &config.outputs {
        let name = &output.name;
        match (&output.url, output.kind.requires_url()) {
            (None, true) => errors.push(format!("output {name:?}: url is required")),
            (Some(url), _) => {
                let allowed = allowed_schemes(&output.kind);
                if !allowed.contains(&url.scheme()) {
                    errors.push(format!(
                        "output {name:?}: url scheme {:?} is not one of {allowed:?}",
                        url.scheme()
                    ));
                }
                if url.host_str().is_none() {
                    errors.push(format!("output {name:?}: url has no host"));
                }
            }
            (None, false) => {}
        }

        match &output.kind {
            OutputKind::Cloudwatch { cloudwatch } if cloudwatch.region.is_empty() => {
                errors.push(format!("output {name:?}: cloudwatch.region is required"));
            }
            OutputKind::AzureMonitor { azure_monitor } => {
                if azure_monitor.customer_id.is_empty() {
                    errors.push(format!("output {name:?}: azureMonitor.customerId is required"));
                }
                if azure_monitor.log_type.is_empty()
                    || azure_monitor.log_type.len() > 100
                    || !azure_monitor
                        .log_type
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    errors.push(format!(
                        "output {name:?}: azureMonitor.logType must be 1-100 letters, digits or underscores"
                    ));
                }
            }
            OutputKind::Kafka { kafka } => {
                if output.url.is_none() && kafka.brokers.is_empty() {
                    errors.push(format!("output {name:?}: url or kafka.brokers is required"));
                }
                for broker in &kafka.brokers {
                    if !["tcp", "tls"].contains(&broker.scheme()) || broker.host_str().is_none() {
                        errors.push(format!(
                            "output {name:?}: kafka broker {broker} must be a tcp or tls url with a host"
                        ));
                    }
                }
                if crate::sinks::kafka::codec(output.tuning.compression).is_none() {
                    errors.push(format!(
                        "output {name:?}: kafka does not support {:?} compression",
                        output.tuning.compression
                    ));
                }
            }
            OutputKind::GoogleCloudLogging {
                google_cloud_logging,
            } => {
                if google_cloud_logging.parent().is_err() {
                    errors.push(format!(
                        "output {name:?}: exactly one of googleCloudLogging.projectId, folderId, organizationId or billingAccountId is required"
                    ));
                }
                if google_cloud_logging.log_id.get_ref().is_empty() {
                    errors.push(format!("output {name:?}: googleCloudLogging.logId is required"));
                }
            }
            OutputKind::Elasticsearch { elasticsearch } => {
                if elasticsearch.version < 6 {
                    errors.push(format!(
                        "output {name:?}: elasticsearch.version {} is not supported",
                        elasticsearch.version
                    ));
                }
                if let Some(suffix) = &elasticsearch.index_date_suffix
                    && StrftimeItems::new(suffix).any(|item| matches!(item, Item::Error))
                {
                    errors.push(format!(
                        "output {name:?}: elasticsearch.indexDateSuffix {suffix:?} is not a valid date format"
                    ));
                }
            }
            _ => {}
        }

        if let Some(tls) = &output.tls {
            if tls.key.is_some() != tls.certificate.is_some() {
                errors.push(format!(
                    "output {name:?}: tls.certificate and tls.key must be set together"
                ));
            }
            if tls.key_passphrase.is_some() && tls.key.is_none() {
                errors.push(format!("output {name:?}: tls.keyPassphrase without tls.key"));
            }
        }

        let tuning = &output.tuning;
        if tuning.min_retry_duration.is_zero() {
            errors.push(format!("output {name:?}: tuning.minRetryDuration must be positive"));
        }
        if tuning.min_retry_duration > tuning.max_retry_duration {
            errors.push(format!(
                "output {name:?}: tuning.minRetryDuration exceeds tuning.maxRetryDuration"
            ));
        }
        if tuning.max_write.is_some_and(|quantity| quantity.0 == 0) {
            errors.push(format!("output {name:?}: tuning.maxWrite must be positive"));
        }
        if tuning.buffer.max_events == 0 {
            errors.push(format!("output {name:?}: tuning.buffer.maxEvents must be positive"));
        }
        if tuning.buffer.total_limit_size.is_some_and(|quantity| quantity.0 == 0) {
            errors.push(format!(
                "output {name:?}: tuning.buffer.totalLimitSize must be positive"
            ));
        }
        if tuning.circuit_breaker.failure_threshold == 0 {
            errors.push(format!(
                "output {name:?}: tuning.circuitBreaker.failureThreshold must be positive"
            ));
        }
        if output
            .rate_limit
            .is_some_and(|limit| limit.max_records_per_second == 0)
        {
            errors.push(format!(
                "output {name:?}: rateLimit.maxRecordsPerSecond must be positive"
            ));
        }
    }
}

fn allowed_schemes(kind: &OutputKind) -> &'static [&'static str] {
    match kind {
        OutputKind::Syslog { .. } => &["udp", "tcp", "tls"],
        OutputKind::Kafka { .. } => &["tcp", "tls"],
        _ => &["http", "https"],
    }
}

fn check_filters(config: &ForwarderConfig, errors: &mut Vec<String>) {
    check_unique(
        "filter",
        config.filters.iter().map(|filter| filter.name.as_str()),
        errors,
    );

    let required: Vec<FieldPath> = REQUIRED_FIELDS
        .iter()
        .filter_map(|field| FieldPath::parse(field).ok())
        .collect();

    for filter in &config.filters {
        let name = &filter.name;
        match &filter.kind {
            FilterKind::Drop { drop } => {
                if drop.is_empty() {
                    errors.push(format!("filter {name:?}: drop needs at least one test"));
                }
                for test in drop {
                    if test.test.is_empty() {
                        errors.push(format!("filter {name:?}: drop test has no conditions"));
                    }
                    for condition in &test.test {
                        if condition.matches.is_some() == condition.not_matches.is_some() {
                            errors.push(format!(
                                "filter {name:?}: condition on {} needs exactly one of matches or notMatches",
                                condition.field
                            ));
                        }
                    }
                }
            }
            FilterKind::Prune { prune } => {
                if prune.remove.is_none() && prune.keep.is_none() {
                    errors.push(format!("filter {name:?}: prune needs in or notIn"));
                }
                for path in prune.remove.iter().flatten() {
                    if let Some(field) = required.iter().find(|field| field.starts_with(path)) {
                        errors.push(format!(
                            "filter {name:?}: prune.in cannot remove required field {field}"
                        ));
                    }
                }
                if let Some(keep) = &prune.keep {
                    for field in &required {
                        if !keep.iter().any(|path| field.starts_with(path)) {
                            errors.push(format!(
                                "filter {name:?}: prune.notIn must keep required field {field}"
                            ));
                        }
                    }
                }
            }
            FilterKind::OpenshiftLabels { labels } if labels.is_empty() => {
                errors.push(format!("filter {name:?}: openshiftLabels is empty"));
            }
            _ => {}
        }
    }
}

fn check_pipelines(
    config: &ForwarderConfig,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    if config.pipelines.is_empty() {
        errors.push("at least one pipeline is required".to_string());
    }
    check_unique(
        "pipeline",
        config.pipelines.iter().map(|pipeline| pipeline.name.as_str()),
        errors,
    );

    let mut used_outputs = HashSet::new();
    for pipeline in &config.pipelines {
        let name = &pipeline.name;
        if pipeline.input_refs.is_empty() {
            errors.push(format!("pipeline {name:?}: inputRefs is empty"));
        }
        if pipeline.output_refs.is_empty() {
            errors.push(format!("pipeline {name:?}: outputRefs is empty"));
        }
        for input in &pipeline.input_refs {
            if config.input(input).is_none() {
                errors.push(format!("pipeline {name:?}: unknown input {input:?}"));
            }
        }
        for output in &pipeline.output_refs {
            if config.output(output).is_none() {
                errors.push(format!("pipeline {name:?}: unknown output {output:?}"));
            }
            used_outputs.insert(output.as_str());
        }
        for filter in &pipeline.filter_refs {
            if config.filter(filter).is_none() {
                errors.push(format!("pipeline {name:?}: unknown filter {filter:?}"));
            }
        }
        check_kept_hostname(config, pipeline, errors);
        let mut seen = HashSet::new();
        for output in &pipeline.output_refs {
            if !seen.insert(output) {
                warnings.push(format!(
                    "pipeline {name:?}: output {output:?} is listed more than once"
                ));
            }
        }
    }

    for output in &config.outputs {
        if !used_outputs.contains(output.name.as_str()) {
            warnings.push(format!(
                "output {:?} is not referenced by any pipeline",
                output.name
            ));
        }
    }
}

/// Google Cloud Logging needs `hostname`, so pipelines feeding it may not prune it.
fn check_kept_hostname(config: &ForwarderConfig, pipeline: &PipelineSpec, errors: &mut Vec<String>) {
    let Ok(hostname) = FieldPath::parse(".hostname") else {
        return;
    };
    let feeds_gcl = pipeline.output_refs.iter().any(|output| {
        config
            .output(output)
            .is_some_and(|output| matches!(output.kind, OutputKind::GoogleCloudLogging { .. }))
    });
    if !feeds_gcl {
        return;
    }
    for filter in pipeline.filter_refs.iter().filter_map(|name| config.filter(name)) {
        let FilterKind::Prune { prune } = &filter.kind else {
            continue;
        };
        let removed = prune
            .remove
            .iter()
            .flatten()
            .any(|path| hostname.starts_with(path));
        let dropped = prune
            .keep
            .as_ref()
            .is_some_and(|keep| !keep.iter().any(|path| hostname.starts_with(path)));
        if removed || dropped {
            errors.push(format!(
                "pipeline {:?}: filter {:?} prunes `.hostname`, which googleCloudLogging requires",
                pipeline.name, filter.name
            ));
        }
    }
}
