use std::ffi::OsString;
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use lexopt::Parser;

fn print_version() {
    println!(
        "{crate_name} {crate_version}",
        crate_name = env!("CARGO_PKG_NAME"),
        crate_version = env!("CARGO_PKG_VERSION")
    );
}

fn print_help() {
    println!(
        "{}",
        format!(
            r#"
{crate_name} {crate_version}

{crate_name} runs a command like `time` does, and follows every process and
thread the command creates. While they run it samples the combined
proportional set size (PSS) of the whole process tree, and once they are all
gone it prints the thread and process counts, the peak PSS, the run times and
a chart of PSS over time.

Process creation is observed through the kernel's netlink process connector,
which requires root. When run through sudo, COMMAND runs as the invoking user.

USAGE:
    {bin} [flags] <COMMAND>...
    {bin} [flags] -- <COMMAND>...

OPTIONS:
    -o OUTPUT, --output OUTPUT
        Also write the results, including every sample, as JSON to OUTPUT.

    -r, --return-result
        If set, and COMMAND exits with a non-zero exit code, then {bin} itself
        will exit with that same exit code.

        Can be disabled with --no-return-result.

    -p MS, --period MS
        Sample memory every MS milliseconds. Defaults to {period}.

    --columns N
        Width of the chart. Defaults to {columns}.

    --rows N
        Height of the chart. Defaults to {rows}.

    -a, --wait-all
        Keep going until every process of the tree has exited, not only
        COMMAND itself.

    -q, --quiet
        Don't print a line for each program the tree executes.

ENVIRONMENT:
    TREETIME_LOG
        Log filter for diagnostics on stderr, e.g. `debug`. Defaults to `warn`.

EXAMPLES:
    sudo {bin} make -j8
        Build, then see how many processes it took and how much memory.

    sudo {bin} --wait-all --output ./results.json -- sh -c 'sleep 1 &'
        Also follow the background sleep, and keep the raw samples.
"#,
            bin = env!("CARGO_BIN_NAME"),
            crate_name = env!("CARGO_PKG_NAME"),
            crate_version = env!("CARGO_PKG_VERSION"),
            period = Args::default().period_ms,
            columns = Args::default().columns,
            rows = Args::default().rows,
        )
        .trim()
    );
}

#[derive(Debug)]
pub struct Args {
    pub return_result: bool,
    pub output: Option<PathBuf>,
    pub period_ms: u64,
    pub columns: usize,
    pub rows: u64,
    pub wait_all: bool,
    pub quiet: bool,

    pub command: Vec<OsString>,
}

impl Default for Args {
    fn default() -> Self {
        Args {
            return_result: false,
            output: None,
            period_ms: 1,
            columns: 85,
            rows: 15,
            wait_all: false,
            quiet: false,
            command: vec![],
        }
    }
}

impl Args {
    pub fn parse() -> Result<Args> {
        Args::parse_impl(lexopt::Parser::from_env())
    }

    fn parse_impl(mut parser: Parser) -> Result<Args> {
        use lexopt::prelude::*;

        let mut args = Args::default();

        while let Some(arg) = parser.next()? {
            match arg {
                // -r, --return-result, --no-return-result
                Short('r') | Long("return-result") => args.return_result = true,
                Long("no-return-result") => args.return_result = false,

                // -o=X, --output=X
                Short('o') | Long("output") => {
                    args.output = Some(parser.value()?.into());
                }

                // -p=X, --period=X
                Short('p') | Long("period") => {
                    args.period_ms = parser.value()?.parse().context("invalid --period")?;
                    if args.period_ms == 0 {
                        bail!("--period must be at least 1 millisecond");
                    }
                }

                Long("columns") => {
                    args.columns = parser.value()?.parse().context("invalid --columns")?;
                    if args.columns == 0 {
                        bail!("--columns must be at least 1");
                    }
                }

                Long("rows") => {
                    args.rows = parser.value()?.parse().context("invalid --rows")?;
                    if args.rows < 2 {
                        bail!("--rows must be at least 2");
                    }
                }

                Short('a') | Long("wait-all") => args.wait_all = true,
                Short('q') | Long("quiet") => args.quiet = true,

                // -h, --help
                Short('h') | Long("help") => {
                    print_help();
                    process::exit(0);
                }

                // -v, --version
                Short('v') | Long("version") => {
                    print_version();
                    process::exit(0);
                }

                // collect the rest of the arguments as the command to run
                Value(other) => {
                    args.command.push(other);
                    args.command.extend(parser.raw_args()?);
                }

                _ => bail!(arg.unexpected()),
            }
        }

        if args.command.is_empty() {
            print_help();
            bail!("No command was given.");
        }

        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! args {
        () => {
            Args::parse_impl(Parser::from_args(Vec::<OsString>::new()))
        };
        ($($x:expr $(,)?)+) => {
            Args::parse_impl(Parser::from_args([$($x,)+]))
        };
    }

    #[test]
    fn command() -> Result<()> {
        assert_eq!(args!("--return-result", "--", "foo")?.command, vec!["foo"]);
        assert_eq!(args!("foo")?.command, vec!["foo"]);
        assert_eq!(
            args!("foo", "--return-result")?.command,
            vec!["foo", "--return-result"]
        );
        assert_eq!(
            args!("-q", "foo", "--output=bar")?.command,
            vec!["foo", "--output=bar"]
        );
        Ok(())
    }

    #[test]
    fn command_required() -> Result<()> {
        assert!(args!().is_err());
        assert!(args!("--return-result").is_err());
        assert!(args!("--return-result", "--").is_err());
        Ok(())
    }

    #[test]
    fn output() -> Result<()> {
        assert_eq!(args!("ls", ".")?.output, None);
        assert_eq!(
            args!("--output=foo", "ls", ".")?.output,
            Some(PathBuf::from("foo"))
        );
        assert_eq!(
            args!("-o", "foo", "ls")?.output,
            Some(PathBuf::from("foo"))
        );
        Ok(())
    }

    #[test]
    fn return_result() -> Result<()> {
        assert_eq!(args!("foo")?.return_result, false);
        assert_eq!(args!("-r", "foo")?.return_result, true);
        assert_eq!(
            args!("-r", "--no-return-result", "foo")?.return_result,
            false
        );
        Ok(())
    }

    #[test]
    fn sampling_and_chart() -> Result<()> {
        let args = args!("foo")?;
        assert_eq!((args.period_ms, args.columns, args.rows), (1, 85, 15));

        let args = args!("-p", "5", "--columns=40", "--rows", "10", "foo")?;
        assert_eq!((args.period_ms, args.columns, args.rows), (5, 40, 10));

        assert!(args!("--period=0", "foo").is_err());
        assert!(args!("--period=soon", "foo").is_err());
        assert!(args!("--columns=0", "foo").is_err());
        assert!(args!("--rows=1", "foo").is_err());
        Ok(())
    }

    #[test]
    fn flags() -> Result<()> {
        let args = args!("foo")?;
        assert!(!args.wait_all && !args.quiet);

        let args = args!("-a", "-q", "foo")?;
        assert!(args.wait_all && args.quiet);

        let args = args!("--wait-all", "--quiet", "foo")?;
        assert!(args.wait_all && args.quiet);
        Ok(())
    }
}
