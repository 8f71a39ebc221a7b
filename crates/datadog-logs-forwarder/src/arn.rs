// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Rebuilds the ARN of the resource that wrote an S3 log object.
//!
//! The ARN becomes the host of the emitted records. Only services whose
//! object key (or bucket) carries enough structure are supported; every
//! other source yields `None`.

use tracing::debug;

use crate::trigger::ForwarderContext;

const AWS_LOGS_SEGMENT: &str = "AWSLogs";

/// Picks the ARN partition for a region.
#[must_use]
pub fn get_partition_from_region(region: &str) -> &'static str {
    if region.starts_with("us-gov-") {
        "aws-us-gov"
    } else if region.starts_with("cn-") {
        "aws-cn"
    } else {
        "aws"
    }
}

/// Returns the ARN of the service that produced `key`, if derivable.
#[must_use]
pub fn parse_service_arn(
    source: &str,
    key: &str,
    bucket: Option<&str>,
    context: &ForwarderContext,
) -> Option<String> {
    match source {
        "elb" => elb_arn(key),
        "s3" => bucket
            .filter(|bucket| !bucket.is_empty())
            .map(|bucket| format!("arn:aws:s3:::{bucket}")),
        "cloudfront" => cloudfront_arn(key, context),
        "redshift" => redshift_arn(key),
        _ => None,
    }
}

/// `AWSLogs/<account>/elasticloadbalancing/<region>/yyyy/mm/dd/<account>_elasticloadbalancing_<region>_<type>.<name>.<id>_...`
///
/// Any number of bucket prefixes may precede the `AWSLogs` segment.
fn elb_arn(key: &str) -> Option<String> {
    let segments: Vec<&str> = key.split('/').collect();
    let Some(start) = segments.iter().position(|segment| *segment == AWS_LOGS_SEGMENT) else {
        debug!("Invalid S3 key, doesn't contain {AWS_LOGS_SEGMENT}: {key}");
        return None;
    };
    let canonical = &segments[start..];
    let account = canonical.get(1).filter(|account| !account.is_empty())?;
    let filename = canonical.last()?;

    let parts: Vec<&str> = filename.split('_').collect();
    if parts.len() <= 3 {
        debug!("Unable to parse ELB file name: {filename}");
        return None;
    }
    let region = parts[2].to_lowercase();
    let load_balancer = parts[3].replace('.', "/");
    let partition = get_partition_from_region(&region);

    Some(format!(
        "arn:{partition}:elasticloadbalancing:{region}:{account}:loadbalancer/{load_balancer}"
    ))
}

/// File name layout: `<distribution-id>.YYYY-MM-DD-HH.<unique-id>.gz`.
fn cloudfront_arn(key: &str, context: &ForwarderContext) -> Option<String> {
    let filename = key.rsplit('/').next()?;
    let parts: Vec<&str> = filename.split('.').collect();
    if parts.len() <= 3 {
        return None;
    }
    let distribution_id = parts[parts.len() - 4].to_lowercase();
    let account_id = context.account_id()?.to_lowercase();
    Some(format!(
        "arn:aws:cloudfront::{account_id}:distribution/{distribution_id}"
    ))
}

/// `AWSLogs/<account>/redshift/<region>/yyyy/mm/dd/<account>_redshift_<region>_<cluster>_<logtype>_<ts>.gz`
fn redshift_arn(key: &str) -> Option<String> {
    let segments: Vec<&str> = key.split('/').collect();
    if segments.len() != 8 {
        return None;
    }
    let region = segments[3].to_lowercase();
    let account_id = segments[1].to_lowercase();
    let parts: Vec<&str> = segments[7].split('_').collect();
    if parts.len() != 6 {
        return None;
    }
    let cluster = parts[3];
    let partition = get_partition_from_region(&region);
    Some(format!(
        "arn:{partition}:redshift:{region}:{account_id}:cluster:{cluster}:"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ELB_ARN: &str =
        "arn:aws:elasticloadbalancing:us-east-1:123456789123:loadbalancer/app/my-alb-name/123456789aabcdef";

    fn elb(key: &str) -> Option<String> {
        parse_service_arn("elb", key, None, &ForwarderContext::default())
    }

    #[test]
    fn test_elb_s3_key_invalid() {
        assert_eq!(
            elb("123456789123/elasticloadbalancing/us-east-1/2022/02/08/123456789123_elasticloadbalancing_us-east-1_app.my-alb-name.123456789aabcdef_20220208T1127Z_10.0.0.2_1abcdef2.log.gz"),
            None
        );
    }

    #[test]
    fn test_elb_s3_key_prefixes_are_ignored() {
        let keys = [
            "AWSLogs/123456789123/elasticloadbalancing/us-east-1/2022/02/08/123456789123_elasticloadbalancing_us-east-1_app.my-alb-name.123456789aabcdef_20220208T1127Z_10.0.0.2_1abcdef2.log.gz",
            "elasticloadbalancing/AWSLogs/123456789123/elasticloadbalancing/us-east-1/2022/02/08/123456789123_elasticloadbalancing_us-east-1_app.my-alb-name.123456789aabcdef_20220208T1127Z_10.0.0.2_1abcdef2.log.gz",
            "elasticloadbalancing/my-alb-name/AWSLogs/123456789123/elasticloadbalancing/us-east-1/2022/02/08/123456789123_elasticloadbalancing_us-east-1_app.my-alb-name.123456789aabcdef_20220208T1127Z_10.0.0.2_1abcdef2.log.gz",
        ];
        for key in keys {
            assert_eq!(elb(key).as_deref(), Some(ELB_ARN), "key: {key}");
        }
    }

    #[test]
    fn test_elb_s3_key_multi_prefix_gov() {
        assert_eq!(
            elb("elasticloadbalancing/my-alb-name/AWSLogs/123456789123/elasticloadbalancing/us-gov-east-1/2022/02/08/123456789123_elasticloadbalancing_us-gov-east-1_app.my-alb-name.123456789aabcdef_20220208T1127Z_10.0.0.2_1abcdef2.log.gz").as_deref(),
            Some("arn:aws-us-gov:elasticloadbalancing:us-gov-east-1:123456789123:loadbalancer/app/my-alb-name/123456789aabcdef")
        );
    }

    #[test]
    fn test_partition_from_region() {
        assert_eq!(get_partition_from_region("us-gov-west-1"), "aws-us-gov");
        assert_eq!(get_partition_from_region("cn-north-1"), "aws-cn");
        assert_eq!(get_partition_from_region("eu-west-3"), "aws");
        assert_eq!(get_partition_from_region(""), "aws");
    }

    #[test]
    fn test_s3_bucket_arn() {
        let context = ForwarderContext::default();
        assert_eq!(
            parse_service_arn("s3", "any/key", Some("my-bucket"), &context).as_deref(),
            Some("arn:aws:s3:::my-bucket")
        );
        assert_eq!(parse_service_arn("s3", "any/key", None, &context), None);
    }

    #[test]
    fn test_cloudfront_arn() {
        let context =
            ForwarderContext::new("arn:aws:lambda:us-east-1:601427279990:function:forwarder");
        assert_eq!(
            parse_service_arn(
                "cloudfront",
                "AWSLogs/cloudfront/E2ABCDEF123456.2019-09-11-19.a1b2c3d4.gz",
                None,
                &context
            )
            .as_deref(),
            Some("arn:aws:cloudfront::601427279990:distribution/e2abcdef123456")
        );
        assert_eq!(
            parse_service_arn(
                "cloudfront",
                "AWSLogs/cloudfront/E2ABCDEF123456.2019-09-11-19.a1b2c3d4.gz",
                None,
                &ForwarderContext::default()
            ),
            None
        );
    }

    #[test]
    fn test_redshift_arn() {
        assert_eq!(
            parse_service_arn(
                "redshift",
                "AWSLogs/123456779121/redshift/us-gov-east-1/2020/10/21/123456779121_redshift_us-gov-east-1_mycluster_userlog_2020-10-21T18:01.gz",
                None,
                &ForwarderContext::default()
            )
            .as_deref(),
            Some("arn:aws-us-gov:redshift:us-gov-east-1:123456779121:cluster:mycluster:")
        );
    }

    #[test]
    fn test_unsupported_source() {
        assert_eq!(
            parse_service_arn("waf", "AWSLogs/1/x", Some("b"), &ForwarderContext::default()),
            None
        );
    }
}
