use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use cliqsafe::{
    clock::shared_system_clock,
    config::WorkflowConfig,
    db,
    models::{AccountRole, BillingCycle},
    services::{
        account_service::CreateAccountRequest, create_email_sender, CreatePlanRequest,
        PlanSelection,
    },
    AppState,
};

#[derive(Parser)]
#[command(name = "cliqsafe-cli")]
#[command(about = "Operator tool for Cliqsafe accounts, approvals and plans", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Account management commands
    Account {
        #[command(subcommand)]
        command: AccountCommands,
    },
    /// Parent approval commands
    Approval {
        #[command(subcommand)]
        command: ApprovalCommands,
    },
    /// Plan and seat commands
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Token maintenance commands
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum AdultRole {
    Adult,
    Parent,
}

#[derive(Subcommand)]
enum AccountCommands {
    /// Create an adult or parent account
    Create {
        #[arg(short, long)]
        email: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(short, long)]
        password: String,
        #[arg(long, value_enum, default_value_t = AdultRole::Adult)]
        role: AdultRole,
    },
    /// Print a fresh login link for an account
    MagicLink {
        #[arg(short, long)]
        email: String,
    },
}

#[derive(Subcommand)]
enum ApprovalCommands {
    /// List approvals addressed to a parent email
    List {
        #[arg(short, long)]
        email: String,
    },
    /// Issue and email a new link for a pending approval
    Resend {
        #[arg(long)]
        id: i64,
    },
}

#[derive(Subcommand)]
enum PlanCommands {
    /// Create a plan owned by an existing account
    Create {
        #[arg(long)]
        owner_email: String,
        #[arg(long)]
        max_members: i64,
        #[arg(long)]
        group: bool,
        #[arg(long)]
        yearly: bool,
    },
    /// Show seat availability
    Availability {
        #[arg(long)]
        plan_id: i64,
    },
    /// Change the number of seats on a plan
    Resize {
        #[arg(long)]
        plan_id: i64,
        #[arg(long)]
        max_members: i64,
    },
}

#[derive(Subcommand)]
enum TokenCommands {
    /// Delete expired tokens
    Sweep,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cliqsafe=info".into()),
        )
        .init();

    // Connect to database
    let pool = db::create_pool().await?;

    // Run migrations
    sqlx::migrate!("./migrations").run(&pool).await?;

    let config = WorkflowConfig::from_env();
    let state = AppState::new(
        pool,
        shared_system_clock(),
        create_email_sender(),
        config.clone(),
    );

    // Parse CLI arguments
    let cli = Cli::parse();

    match cli.command {
        Commands::Account { command } => match command {
            AccountCommands::Create {
                email,
                first_name,
                last_name,
                password,
                role,
            } => {
                let role = match role {
                    AdultRole::Adult => AccountRole::Adult,
                    AdultRole::Parent => AccountRole::Parent,
                };
                let account = state
                    .account_service
                    .create_account(CreateAccountRequest {
                        email,
                        first_name,
                        last_name,
                        password,
                        role,
                    })
                    .await?;
                println!("✅ Account created");
                println!("  ID: {}", account.id);
                println!("  Email: {}", account.email.as_deref().unwrap_or("-"));
                println!("  Role: {}", account.role);
            }
            AccountCommands::MagicLink { email } => {
                let account = state
                    .account_service
                    .find_by_email(&email)
                    .await?
                    .with_context(|| format!("no account for {}", email))?;
                let secret = state
                    .auth_token_service
                    .issue_magic_link(account.id)
                    .await?;
                println!("{}", config.magic_link_url(&secret));
            }
        },

        Commands::Approval { command } => match command {
            ApprovalCommands::List { email } => {
                let approvals = state
                    .approval_service
                    .get_approvals_by_parent_email(&email)
                    .await?;
                if approvals.is_empty() {
                    println!("No approvals found.");
                } else {
                    println!(
                        "{:<6} {:<30} {:<10} {:<10} {:<12}",
                        "ID", "Child", "Status", "Context", "Expires"
                    );
                    println!("{}", "-".repeat(72));
                    for approval in approvals {
                        println!(
                            "{:<6} {:<30} {:<10} {:<10} {:<12}",
                            approval.id,
                            format!("{} {}", approval.child_first_name, approval.child_last_name),
                            approval.status,
                            format!("{:?}", approval.context),
                            approval.expires_at_time().format("%Y-%m-%d")
                        );
                    }
                }
            }
            ApprovalCommands::Resend { id } => {
                let resent = state.approval_service.resend_approval(id).await?;
                if resent.email_delivered {
                    println!("✅ Approval link re-sent to {}", resent.approval.parent_email);
                } else {
                    println!("⚠️  Email delivery failed; share this link manually:");
                }
                println!("{}", config.approval_url(&resent.raw_secret));
            }
        },

        Commands::Plan { command } => match command {
            PlanCommands::Create {
                owner_email,
                max_members,
                group,
                yearly,
            } => {
                let Some(owner) = state.account_service.find_by_email(&owner_email).await? else {
                    bail!("no account for {}", owner_email);
                };
                let plan = state
                    .plan_service
                    .create_plan(CreatePlanRequest {
                        owner_id: owner.id,
                        max_members,
                        is_group_plan: group,
                        billing_cycle: if yearly {
                            BillingCycle::Yearly
                        } else {
                            BillingCycle::Monthly
                        },
                        stripe_subscription_id: None,
                    })
                    .await?;
                let selection = state
                    .approval_service
                    .complete_plan_selection(owner.id)
                    .await?;
                println!("✅ Plan {} created for {}", plan.id, owner_email);
                print_selection(&selection);
            }
            PlanCommands::Availability { plan_id } => {
                let availability = state.plan_service.check_availability(plan_id).await?;
                println!(
                    "Plan {}: {}/{} seats used, {} free",
                    plan_id,
                    availability.current_members,
                    availability.max_members,
                    availability.slots_remaining
                );
            }
            PlanCommands::Resize {
                plan_id,
                max_members,
            } => {
                let plan = state
                    .plan_service
                    .change_capacity(plan_id, max_members)
                    .await?;
                let selection = state
                    .approval_service
                    .complete_plan_selection(plan.owner_id)
                    .await?;
                let plan = state
                    .plan_service
                    .find_plan(plan.id)
                    .await?
                    .context("plan disappeared while resizing")?;
                println!(
                    "✅ Plan {} now has {} seats ({} used)",
                    plan.id, plan.max_members, plan.current_members
                );
                print_selection(&selection);
            }
        },

        Commands::Token { command } => match command {
            TokenCommands::Sweep => {
                let removed = state.token_store.sweep_expired().await?;
                println!("🧹 Removed {} expired tokens", removed);
            }
        },
    }

    Ok(())
}

fn print_selection(selection: &PlanSelection) {
    if !selection.seated.is_empty() {
        println!("  Seated {} waiting children", selection.seated.len());
    }
    for waiting in &selection.waiting {
        println!(
            "  ⚠️  No seat for child {} (approval {}); still waiting",
            waiting.child_id, waiting.approval_id
        );
    }
}
