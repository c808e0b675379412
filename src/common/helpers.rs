use anyhow::Error;

pub fn print_error_chain(err: &Error) {
    error!("{}", format_error_chain(err));
}

pub fn format_error_chain(err: &Error) -> String {
    // Main context message followed by its chain of causes
    err.chain()
        .enumerate()
        .map(|(index, cause)| {
            if index == 0 {
                cause.to_string()
            } else {
                format!("       └> {}", cause)
            }
        })
        .collect::<Vec<String>>()
        .join("\n")
}

/// Single-line form of an error chain, used for report entries.
pub fn flatten_error_chain(err: &Error) -> String {
    err.chain()
        .map(|cause| cause.to_string())
        .collect::<Vec<String>>()
        .join(": ")
}

#[cfg(test)]
mod tests {
    use anyhow::{anyhow, Context};

    use super::*;

    #[test]
    fn chains_are_flattened_outermost_first() {
        let err = Err::<(), _>(anyhow!("deadlock found"))
            .context("Failed to write batch")
            .unwrap_err();

        assert_eq!(
            flatten_error_chain(&err),
            "Failed to write batch: deadlock found"
        );
        assert_eq!(
            format_error_chain(&err),
            "Failed to write batch\n       └> deadlock found"
        );
    }
}
