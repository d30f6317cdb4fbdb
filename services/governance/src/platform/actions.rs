//! Permission Action Sets
//!
//! The platform expresses permissions as lists of API actions granted to a
//! principal. Each manifest [`Permission`] maps to a fixed action set per
//! asset category; higher levels are supersets of lower ones.

use crate::manifest::{AssetCategory, Permission};

const DATASET_READ: &[&str] = &[
    "quicksight:DescribeDataSet",
    "quicksight:DescribeDataSetPermissions",
    "quicksight:PassDataSet",
    "quicksight:DescribeIngestion",
    "quicksight:ListIngestions",
];

const DATASET_WRITE: &[&str] = &[
    "quicksight:DescribeDataSet",
    "quicksight:DescribeDataSetPermissions",
    "quicksight:PassDataSet",
    "quicksight:DescribeIngestion",
    "quicksight:ListIngestions",
    "quicksight:UpdateDataSet",
    "quicksight:CreateIngestion",
    "quicksight:CancelIngestion",
];

const DATASET_OWNER: &[&str] = &[
    "quicksight:DescribeDataSet",
    "quicksight:DescribeDataSetPermissions",
    "quicksight:PassDataSet",
    "quicksight:DescribeIngestion",
    "quicksight:ListIngestions",
    "quicksight:UpdateDataSet",
    "quicksight:CreateIngestion",
    "quicksight:CancelIngestion",
    "quicksight:DeleteDataSet",
    "quicksight:UpdateDataSetPermissions",
];

const DASHBOARD_READ: &[&str] = &[
    "quicksight:DescribeDashboard",
    "quicksight:ListDashboardVersions",
    "quicksight:QueryDashboard",
];

const DASHBOARD_WRITE: &[&str] = &[
    "quicksight:DescribeDashboard",
    "quicksight:ListDashboardVersions",
    "quicksight:QueryDashboard",
    "quicksight:UpdateDashboard",
    "quicksight:UpdateDashboardPublishedVersion",
];

const DASHBOARD_OWNER: &[&str] = &[
    "quicksight:DescribeDashboard",
    "quicksight:ListDashboardVersions",
    "quicksight:QueryDashboard",
    "quicksight:UpdateDashboard",
    "quicksight:UpdateDashboardPublishedVersion",
    "quicksight:DeleteDashboard",
    "quicksight:DescribeDashboardPermissions",
    "quicksight:UpdateDashboardPermissions",
];

const THEME_READ: &[&str] = &[
    "quicksight:DescribeTheme",
    "quicksight:DescribeThemeAlias",
    "quicksight:ListThemeAliases",
    "quicksight:ListThemeVersions",
];

const THEME_WRITE: &[&str] = &[
    "quicksight:DescribeTheme",
    "quicksight:DescribeThemeAlias",
    "quicksight:ListThemeAliases",
    "quicksight:ListThemeVersions",
    "quicksight:UpdateTheme",
    "quicksight:CreateThemeAlias",
    "quicksight:UpdateThemeAlias",
];

const THEME_OWNER: &[&str] = &[
    "quicksight:DescribeTheme",
    "quicksight:DescribeThemeAlias",
    "quicksight:ListThemeAliases",
    "quicksight:ListThemeVersions",
    "quicksight:UpdateTheme",
    "quicksight:CreateThemeAlias",
    "quicksight:UpdateThemeAlias",
    "quicksight:DeleteTheme",
    "quicksight:DeleteThemeAlias",
    "quicksight:DescribeThemePermissions",
    "quicksight:UpdateThemePermissions",
];

const ANALYSIS_READ: &[&str] = &["quicksight:DescribeAnalysis", "quicksight:QueryAnalysis"];

const ANALYSIS_WRITE: &[&str] = &[
    "quicksight:DescribeAnalysis",
    "quicksight:QueryAnalysis",
    "quicksight:UpdateAnalysis",
];

const ANALYSIS_OWNER: &[&str] = &[
    "quicksight:DescribeAnalysis",
    "quicksight:QueryAnalysis",
    "quicksight:UpdateAnalysis",
    "quicksight:DeleteAnalysis",
    "quicksight:RestoreAnalysis",
    "quicksight:DescribeAnalysisPermissions",
    "quicksight:UpdateAnalysisPermissions",
];

const DATA_SOURCE_READ: &[&str] = &[
    "quicksight:DescribeDataSource",
    "quicksight:DescribeDataSourcePermissions",
    "quicksight:PassDataSource",
];

const DATA_SOURCE_WRITE: &[&str] = &[
    "quicksight:DescribeDataSource",
    "quicksight:DescribeDataSourcePermissions",
    "quicksight:PassDataSource",
    "quicksight:UpdateDataSource",
];

const DATA_SOURCE_OWNER: &[&str] = &[
    "quicksight:DescribeDataSource",
    "quicksight:DescribeDataSourcePermissions",
    "quicksight:PassDataSource",
    "quicksight:UpdateDataSource",
    "quicksight:DeleteDataSource",
    "quicksight:UpdateDataSourcePermissions",
];

const LEVELS: [Permission; 3] = [Permission::Owner, Permission::Write, Permission::Read];

/// Actions granted for `permission` on an asset of `category`
pub fn actions_for(category: AssetCategory, permission: Permission) -> &'static [&'static str] {
    match (category, permission) {
        (AssetCategory::Dataset, Permission::Read) => DATASET_READ,
        (AssetCategory::Dataset, Permission::Write) => DATASET_WRITE,
        (AssetCategory::Dataset, Permission::Owner) => DATASET_OWNER,
        (AssetCategory::Dashboard, Permission::Read) => DASHBOARD_READ,
        (AssetCategory::Dashboard, Permission::Write) => DASHBOARD_WRITE,
        (AssetCategory::Dashboard, Permission::Owner) => DASHBOARD_OWNER,
        (AssetCategory::Theme, Permission::Read) => THEME_READ,
        (AssetCategory::Theme, Permission::Write) => THEME_WRITE,
        (AssetCategory::Theme, Permission::Owner) => THEME_OWNER,
        (AssetCategory::Analysis, Permission::Read) => ANALYSIS_READ,
        (AssetCategory::Analysis, Permission::Write) => ANALYSIS_WRITE,
        (AssetCategory::Analysis, Permission::Owner) => ANALYSIS_OWNER,
        (AssetCategory::DataSource, Permission::Read) => DATA_SOURCE_READ,
        (AssetCategory::DataSource, Permission::Write) => DATA_SOURCE_WRITE,
        (AssetCategory::DataSource, Permission::Owner) => DATA_SOURCE_OWNER,
    }
}

/// Highest permission whose full action set is contained in `actions`.
/// `None` when not even the read set is granted.
pub fn permission_from_actions<S: AsRef<str>>(
    category: AssetCategory,
    actions: &[S],
) -> Option<Permission> {
    LEVELS.into_iter().find(|&level| {
        actions_for(category, level)
            .iter()
            .all(|required| actions.iter().any(|a| a.as_ref() == *required))
    })
}

/// Group principal ARN as the platform addresses it
pub fn group_principal(region: &str, account_id: &str, namespace: &str, group: &str) -> String {
    format!(
        "arn:aws:quicksight:{}:{}:group/{}/{}",
        region, account_id, namespace, group
    )
}

/// `(namespace, group)` of a group principal ARN; `None` for users and
/// anything else
pub fn parse_group_principal(arn: &str) -> Option<(&str, &str)> {
    let resource = arn.strip_prefix("arn:aws:quicksight:")?.splitn(3, ':').nth(2)?;
    let (namespace, group) = resource.strip_prefix("group/")?.split_once('/')?;
    (!namespace.is_empty() && !group.is_empty()).then_some((namespace, group))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATEGORIES: [AssetCategory; 5] = [
        AssetCategory::Dataset,
        AssetCategory::Dashboard,
        AssetCategory::Theme,
        AssetCategory::Analysis,
        AssetCategory::DataSource,
    ];

    #[test]
    fn test_dataset_read_actions() {
        let actions = actions_for(AssetCategory::Dataset, Permission::Read);
        assert_eq!(actions.len(), 5);
        assert!(actions.contains(&"quicksight:PassDataSet"));
    }

    #[test]
    fn test_levels_are_supersets() {
        for category in CATEGORIES {
            let read = actions_for(category, Permission::Read);
            let write = actions_for(category, Permission::Write);
            let owner = actions_for(category, Permission::Owner);
            assert!(read.iter().all(|a| write.contains(a)), "{category}");
            assert!(write.iter().all(|a| owner.contains(a)), "{category}");
        }
    }

    #[test]
    fn test_permission_from_actions() {
        for category in CATEGORIES {
            for level in LEVELS {
                assert_eq!(
                    permission_from_actions(category, actions_for(category, level)),
                    Some(level)
                );
            }
        }

        let partial = ["quicksight:DescribeDataSet".to_string()];
        assert_eq!(permission_from_actions(AssetCategory::Dataset, &partial), None);
    }

    #[test]
    fn test_group_principal() {
        assert_eq!(
            group_principal("us-east-1", "123456789012", "biz-eng", "biz-eng-devs"),
            "arn:aws:quicksight:us-east-1:123456789012:group/biz-eng/biz-eng-devs"
        );
        assert_eq!(
            parse_group_principal("arn:aws:quicksight:us-east-1:123456789012:group/biz-eng/biz-eng-devs"),
            Some(("biz-eng", "biz-eng-devs"))
        );
        assert_eq!(
            parse_group_principal("arn:aws:quicksight:us-east-1:123456789012:user/default/alice"),
            None
        );
    }
}
