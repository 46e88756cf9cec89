use std::io::{stdin, stdout, BufRead, Write};

use eyre::{eyre, WrapErr};
use owo_colors::OwoColorize;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PromptChoice {
    Yes,
    No,
    Explain,
}

/// Interpret an answer, an empty answer picks `default` and anything unrecognised is a no
pub(crate) fn parse_choice(input: &str, default: PromptChoice) -> PromptChoice {
    match input.trim().to_lowercase().as_str() {
        "y" | "yes" => PromptChoice::Yes,
        "n" | "no" => PromptChoice::No,
        "e" | "explain" => PromptChoice::Explain,
        "" => default,
        _ => PromptChoice::No,
    }
}

fn highlight(letter: &str, choice: PromptChoice, default: PromptChoice) -> String {
    match choice == default {
        true => letter.to_uppercase(),
        false => letter.to_string(),
    }
}

/// Ask `question` on the terminal, offering to explain unless already `explaining`
pub(crate) async fn prompt(
    question: impl AsRef<str>,
    default: PromptChoice,
    explaining: bool,
) -> eyre::Result<PromptChoice> {
    let mut term =
        term::terminfo::TerminfoTerminal::new(stdout()).ok_or(eyre!("Couldn't get terminal"))?;
    let with_confirm = format!(
        "\
        {question}\n\
        \n\
        {proceed} ({yes}/{no}{maybe_explain}): \
    ",
        question = question.as_ref(),
        proceed = "Proceed?".bold(),
        yes = highlight("y", PromptChoice::Yes, default).green(),
        no = highlight("n", PromptChoice::No, default).red(),
        maybe_explain = match explaining {
            true => String::new(),
            false => format!(
                "/{}",
                highlight("e", PromptChoice::Explain, default).green()
            ),
        },
    );

    term.write_all(with_confirm.as_bytes())?;
    term.flush()?;

    Ok(parse_choice(&read_line()?, default))
}

/// A plain yes or no question, defaulting to no
pub(crate) async fn confirm(question: impl AsRef<str>) -> eyre::Result<bool> {
    Ok(prompt(question, PromptChoice::No, true).await? == PromptChoice::Yes)
}

pub(crate) fn read_line() -> eyre::Result<String> {
    let stdin = stdin();
    let line = stdin.lock().lines().next().transpose()?;
    line.ok_or(eyre!("no lines found from stdin"))
        .context("unable to read from stdin for confirmation")
}

pub(crate) async fn clean_exit_with_message(message: impl AsRef<str>) -> ! {
    eprintln!("{}", message.as_ref());
    std::process::exit(0)
}
